use bmp_io::{CommandRunner, RouteQuery};
use bmp_types::{
    EventRecord, LOC_RIB_PEER, MessageType, OpenInfo, Policy, RD_INSTANCE_PEER_TYPE,
    ZERO_DISTINGUISHER,
};
use tracing::{debug, info, trace};

use crate::cursor::SeqCursor;
use crate::{BmpHarness, HarnessError};

/// Optional narrowing of which peer events count as a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConstraints {
    /// Only route-distinguisher instance peers; `0:0` distinguishers are skipped.
    pub rd_instance: bool,
    pub peer_bgp_id: Option<String>,
    pub peer_distinguisher: Option<String>,
    /// Required `my_as` on both the sent and the received OPEN.
    pub open_as: Option<u64>,
    /// Required `bgp_id` on both the sent and the received OPEN.
    pub open_bgp_id: Option<String>,
}

impl PeerConstraints {
    fn admits(&self, record: &EventRecord) -> bool {
        if self.rd_instance && record.peer_distinguisher.as_deref() == Some(ZERO_DISTINGUISHER) {
            return false;
        }
        if let Some(distinguisher) = &self.peer_distinguisher
            && record.peer_distinguisher.as_ref() != Some(distinguisher)
        {
            return false;
        }
        if let Some(bgp_id) = &self.peer_bgp_id
            && record.peer_bgp_id.as_ref() != Some(bgp_id)
        {
            return false;
        }
        if let Some(asn) = self.open_as
            && !both_opens(record, |open| open.my_as == Some(asn))
        {
            return false;
        }
        if let Some(bgp_id) = &self.open_bgp_id
            && !both_opens(record, |open| open.bgp_id.as_ref() == Some(bgp_id))
        {
            return false;
        }
        true
    }
}

fn both_opens(record: &EventRecord, accept: impl Fn(&OpenInfo) -> bool) -> bool {
    [&record.open_tx, &record.open_rx]
        .into_iter()
        .all(|open| open.as_ref().is_some_and(&accept))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    pub peers: Vec<String>,
    pub log_type: MessageType,
    pub constraints: PeerConstraints,
}

impl PeerRequest {
    pub fn new<I, S>(peers: I, log_type: MessageType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            peers: peers.into_iter().map(Into::into).collect(),
            log_type,
            constraints: PeerConstraints::default(),
        }
    }

    #[must_use]
    pub fn with_constraints(mut self, constraints: PeerConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Peer identity `record` stands for, if it qualifies at all.
    ///
    /// Loc-RIB events carry no real peer and stand for [`LOC_RIB_PEER`].
    #[must_use]
    pub fn identity<'r>(&self, record: &'r EventRecord) -> Option<&'r str> {
        if !self.constraints.admits(record) || !record.is_type(&self.log_type) {
            return None;
        }
        match record.peer_address() {
            Some(_)
                if self.constraints.rd_instance
                    && record.peer_type.as_deref() != Some(RD_INSTANCE_PEER_TYPE) =>
            {
                None
            }
            Some(peer) => Some(peer),
            None if record.is_policy(&Policy::LocRib) => Some(LOC_RIB_PEER),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMatch {
    /// Every expected peer has an event; `newest_seq` is the highest `seq`
    /// among the first event of each peer.
    Found { newest_seq: Option<u64> },
    Missing { peer: String },
}

/// Pairs each expected peer with its first qualifying event in `records`
/// (already past the cursor, in `seq` order). Stops at the first peer
/// without one.
#[must_use]
pub fn match_peers(records: &[EventRecord], request: &PeerRequest) -> PeerMatch {
    let candidates = records
        .iter()
        .filter_map(|record| {
            trace!(seq = record.seq, fields = ?record.fields(), "looking at bmp event");
            request.identity(record).map(|peer| (peer, record.seq))
        })
        .collect::<Vec<_>>();

    let mut newest_seq = None;
    for expected in &request.peers {
        match candidates.iter().find(|(peer, _)| peer == expected) {
            Some((_, seq)) => {
                debug!(peer = %expected, log_type = %request.log_type, seq, "peer present in bmp log");
                newest_seq = newest_seq.max(Some(*seq));
            }
            None => {
                debug!(peer = %expected, log_type = %request.log_type, "peer not present in bmp log");
                return PeerMatch::Missing {
                    peer: expected.clone(),
                };
            }
        }
    }
    PeerMatch::Found { newest_seq }
}

impl<C: CommandRunner, Q: RouteQuery> BmpHarness<C, Q> {
    /// True when every expected peer has a qualifying event since `cursor`.
    ///
    /// On success the cursor moves to the newest matched event. A missing
    /// peer is an ordinary negative result and leaves the cursor alone.
    pub fn check_peers(
        &self,
        request: &PeerRequest,
        cursor: &mut SeqCursor,
    ) -> Result<bool, HarnessError> {
        info!(cursor = cursor.get(), log_type = %request.log_type, "checking bmp peers");
        let records = cursor.unread(self.read_records()?);

        match match_peers(&records, request) {
            PeerMatch::Found { newest_seq } => {
                if let Some(seq) = newest_seq {
                    cursor.advance_to(seq);
                }
                Ok(true)
            }
            PeerMatch::Missing { .. } => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use bmp_types::{EventRecord, MessageType};
    use serde_json::{Value, json};

    use super::{PeerConstraints, PeerMatch, PeerRequest, match_peers};

    fn records(values: Vec<Value>) -> Vec<EventRecord> {
        values
            .into_iter()
            .map(|value| EventRecord::from_value(value).expect("record"))
            .collect()
    }

    fn peer_up(seq: u64, peer_ip: &str) -> Value {
        json!({"seq": seq, "bmp_log_type": "peer up", "peer_ip": peer_ip, "peer_distinguisher": "0:0", "peer_type": "global instance"})
    }

    #[test]
    fn first_event_per_peer_sets_newest_seq() {
        let events = records(vec![
            peer_up(3, "192.168.0.2"),
            peer_up(4, "192:168::2"),
            peer_up(8, "192.168.0.2"),
        ]);
        let request = PeerRequest::new(["192.168.0.2", "192:168::2"], MessageType::PeerUp);
        assert_eq!(
            match_peers(&events, &request),
            PeerMatch::Found {
                newest_seq: Some(4)
            }
        );
    }

    #[test]
    fn missing_peer_short_circuits() {
        let events = records(vec![peer_up(3, "192.168.0.2")]);
        let request = PeerRequest::new(["192.0.2.1", "192.168.0.2"], MessageType::PeerUp);
        assert_eq!(
            match_peers(&events, &request),
            PeerMatch::Missing {
                peer: "192.0.2.1".to_owned()
            }
        );
    }

    #[test]
    fn wrong_message_type_does_not_qualify() {
        let events = records(vec![peer_up(3, "192.168.0.2")]);
        let request = PeerRequest::new(["192.168.0.2"], MessageType::PeerDown);
        assert!(matches!(
            match_peers(&events, &request),
            PeerMatch::Missing { .. }
        ));
    }

    #[test]
    fn loc_rib_events_stand_for_the_zero_peer() {
        let events = records(vec![
            json!({"seq": 6, "bmp_log_type": "peer up", "policy": "loc-rib", "peer_ip": "0.0.0.0"}),
            json!({"seq": 7, "bmp_log_type": "peer up", "policy": "loc-rib"}),
        ]);
        let request = PeerRequest::new(["0.0.0.0"], MessageType::PeerUp);
        assert_eq!(
            match_peers(&events, &request),
            PeerMatch::Found {
                newest_seq: Some(6)
            }
        );
    }

    #[test]
    fn ipv6_unspecified_address_is_an_ordinary_peer() {
        let events = records(vec![peer_up(4, "::")]);
        let request = PeerRequest::new(["::"], MessageType::PeerUp);
        assert_eq!(
            match_peers(&events, &request),
            PeerMatch::Found {
                newest_seq: Some(4)
            }
        );
    }

    #[test]
    fn rd_instance_requires_non_zero_distinguisher_and_instance_type() {
        let events = records(vec![
            peer_up(2, "192.168.1.3"),
            json!({"seq": 3, "bmp_log_type": "peer up", "peer_ip": "192.168.1.3", "peer_distinguisher": "444:1", "peer_type": "global instance"}),
            json!({"seq": 5, "bmp_log_type": "peer up", "peer_ip": "192.168.1.3", "peer_distinguisher": "444:1", "peer_type": "route distinguisher instance"}),
        ]);
        let request = PeerRequest::new(["192.168.1.3"], MessageType::PeerUp).with_constraints(
            PeerConstraints {
                rd_instance: true,
                peer_distinguisher: Some("444:1".to_owned()),
                ..PeerConstraints::default()
            },
        );
        assert_eq!(
            match_peers(&events, &request),
            PeerMatch::Found {
                newest_seq: Some(5)
            }
        );
    }

    #[test]
    fn open_constraints_apply_to_both_directions() {
        let events = records(vec![
            json!({"seq": 2, "bmp_log_type": "peer up", "peer_ip": "192.168.0.2", "peer_bgp_id": "192.168.0.2",
                   "open_tx": {"my_as": 65501, "bgp_id": "192.168.0.1"}}),
            json!({"seq": 3, "bmp_log_type": "peer up", "peer_ip": "192.168.0.2", "peer_bgp_id": "192.168.0.2",
                   "open_tx": {"my_as": 65501, "bgp_id": "192.168.0.1"},
                   "open_rx": {"my_as": 65502, "bgp_id": "192.168.0.1"}}),
            json!({"seq": 4, "bmp_log_type": "peer up", "peer_ip": "192.168.0.2", "peer_bgp_id": "192.168.0.2",
                   "open_tx": {"my_as": 65501, "bgp_id": "192.168.0.1"},
                   "open_rx": {"my_as": 65501, "bgp_id": "192.168.0.1"}}),
        ]);
        let request = PeerRequest::new(["192.168.0.2"], MessageType::PeerUp).with_constraints(
            PeerConstraints {
                peer_bgp_id: Some("192.168.0.2".to_owned()),
                open_as: Some(65501),
                open_bgp_id: Some("192.168.0.1".to_owned()),
                ..PeerConstraints::default()
            },
        );
        assert_eq!(
            match_peers(&events, &request),
            PeerMatch::Found {
                newest_seq: Some(4)
            }
        );

        let wrong_id = request.clone().with_constraints(PeerConstraints {
            peer_bgp_id: Some("10.0.0.9".to_owned()),
            ..request.constraints.clone()
        });
        assert!(matches!(
            match_peers(&events, &wrong_id),
            PeerMatch::Missing { .. }
        ));
    }

    #[test]
    fn no_expected_peers_is_vacuously_found() {
        let request = PeerRequest::new(Vec::<String>::new(), MessageType::PeerUp);
        assert_eq!(
            match_peers(&[], &request),
            PeerMatch::Found { newest_seq: None }
        );
    }
}
