use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use bmp_io::{IoError, RouteQuery, write_json_pretty};
use bmp_types::{AddressFamily, MessageType, Policy};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::prefix::{PrefixRequest, fixture_name};

/// Files written by one golden refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoldenPaths {
    pub actual: PathBuf,
    pub ipv4: PathBuf,
    pub ipv6: PathBuf,
}

/// Snapshots the actual document plus both routing-table views into
/// `snapshot_dir`, ready to be promoted to fixtures.
pub fn write_golden_files<Q: RouteQuery + ?Sized>(
    snapshot_dir: &Path,
    actual: &Value,
    request: &PrefixRequest,
    routes: &Q,
) -> Result<GoldenPaths, IoError> {
    let actual_path = snapshot_dir.join(request.fixture_name());
    write_json_pretty(&actual_path, actual)?;

    let ipv4 = write_family_snapshot(snapshot_dir, request, routes, AddressFamily::Ipv4)?;
    let ipv6 = write_family_snapshot(snapshot_dir, request, routes, AddressFamily::Ipv6)?;

    info!(
        actual = %actual_path.display(),
        ipv4 = %ipv4.display(),
        ipv6 = %ipv6.display(),
        "refreshed bmp golden files"
    );
    Ok(GoldenPaths {
        actual: actual_path,
        ipv4,
        ipv6,
    })
}

fn write_family_snapshot<Q: RouteQuery + ?Sized>(
    snapshot_dir: &Path,
    request: &PrefixRequest,
    routes: &Q,
    family: AddressFamily,
) -> Result<PathBuf, IoError> {
    let output = routes.show_routes(family)?;
    let filtered = filter_routes(&output, &request.prefixes, family, &request.log_type);
    let path = snapshot_dir.join(format!(
        "show-bgp-{family}-{}-step{}.json",
        request.log_type, request.step
    ));
    write_json_pretty(&path, &filtered)?;
    Ok(path)
}

/// Keeps only the requested prefixes of a `show bgp ... json` document.
///
/// For withdrawals every requested prefix of `family` is pinned to `null`,
/// so the fixture asserts the route is gone.
#[must_use]
pub fn filter_routes(
    output: &Value,
    prefixes: &BTreeSet<String>,
    family: AddressFamily,
    log_type: &MessageType,
) -> Value {
    let mut routes = output
        .get("routes")
        .and_then(Value::as_object)
        .map(|routes| {
            routes
                .iter()
                .filter(|(prefix, _)| prefixes.contains(*prefix))
                .map(|(prefix, info)| (prefix.clone(), info.clone()))
                .collect::<Map<_, _>>()
        })
        .unwrap_or_default();

    if log_type.is_withdraw() {
        for prefix in prefixes {
            if AddressFamily::of_prefix(prefix) == family {
                routes.insert(prefix.clone(), Value::Null);
            }
        }
    }

    let mut document = Map::new();
    document.insert("routes".to_owned(), Value::Object(routes));
    Value::Object(document)
}

/// Writes `{}` for every update/withdraw × policy fixture of `steps` that
/// does not exist yet. Returns the files it created.
pub fn seed_placeholder_fixtures(
    fixture_root: &Path,
    steps: u32,
) -> Result<Vec<PathBuf>, IoError> {
    let mut created = Vec::new();
    for step in 1..=steps {
        for log_type in [MessageType::Update, MessageType::Withdraw] {
            for policy in [Policy::PrePolicy, Policy::PostPolicy, Policy::LocRib] {
                let path = fixture_root.join(fixture_name(&log_type, &policy, step));
                if path.exists() {
                    continue;
                }
                write_json_pretty(&path, &Value::Object(Map::new()))?;
                created.push(path);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;

    use bmp_io::{IoError, RouteQuery, read_json_fixture};
    use bmp_types::{AddressFamily, MessageType, Policy};
    use serde_json::{Value, json};

    use super::{filter_routes, seed_placeholder_fixtures, write_golden_files};
    use crate::compare::json_cmp_exact;
    use crate::prefix::PrefixRequest;

    struct TableDump;

    impl RouteQuery for TableDump {
        fn show_routes(&self, family: AddressFamily) -> Result<Value, IoError> {
            Ok(match family {
                AddressFamily::Ipv4 => json!({"vrfName": "vrf1", "routes": {
                    "172.31.0.15/32": [{"valid": true}],
                    "172.31.0.16/32": [{"valid": true}],
                }}),
                AddressFamily::Ipv6 => json!({"vrfName": "vrf1", "routes": {
                    "2111::1111/128": [{"valid": true}],
                }}),
            })
        }
    }

    fn prefixes() -> BTreeSet<String> {
        ["172.31.0.15/32", "2111::1111/128"]
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn update_filter_keeps_requested_routes_only() {
        let output = TableDump.show_routes(AddressFamily::Ipv4).expect("routes");
        let filtered = filter_routes(&output, &prefixes(), AddressFamily::Ipv4, &MessageType::Update);
        assert_eq!(
            filtered,
            json!({"routes": {"172.31.0.15/32": [{"valid": true}]}})
        );
    }

    #[test]
    fn withdraw_filter_pins_same_family_prefixes_to_null() {
        let output = json!({"routes": {}});
        let v4 = filter_routes(&output, &prefixes(), AddressFamily::Ipv4, &MessageType::Withdraw);
        assert_eq!(v4, json!({"routes": {"172.31.0.15/32": null}}));
        let v6 = filter_routes(&output, &prefixes(), AddressFamily::Ipv6, &MessageType::Withdraw);
        assert_eq!(v6, json!({"routes": {"2111::1111/128": null}}));
        let missing = filter_routes(&json!({}), &prefixes(), AddressFamily::Ipv6, &MessageType::Update);
        assert_eq!(missing, json!({"routes": {}}));
    }

    #[test]
    fn written_snapshot_compares_clean_against_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = PrefixRequest::new(prefixes(), MessageType::Update, Policy::PostPolicy, 4);
        let actual = json!({"post-policy": {"update": {
            "172.31.0.15/32": {"bmp_log_type": "update", "origin": "IGP"},
            "2111::1111/128": {"bmp_log_type": "update", "origin": "IGP"},
        }}});

        let paths = write_golden_files(dir.path(), &actual, &request, &TableDump).expect("golden");
        assert!(paths.actual.ends_with("bmp-update-post-policy-step4.json"));
        assert!(paths.ipv4.ends_with("show-bgp-ipv4-update-step4.json"));
        assert!(paths.ipv6.ends_with("show-bgp-ipv6-update-step4.json"));

        let reread = read_json_fixture(&paths.actual).expect("reread");
        assert_eq!(json_cmp_exact(&actual, &reread), None);
        let v6 = read_json_fixture(&paths.ipv6).expect("v6");
        assert_eq!(v6, json!({"routes": {"2111::1111/128": [{"valid": true}]}}));
    }

    #[test]
    fn seeding_never_overwrites_existing_fixtures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kept = dir.path().join("bmp-update-pre-policy-step1.json");
        fs::write(&kept, "{\"pre-policy\": {}}\n").expect("existing fixture");

        let created = seed_placeholder_fixtures(dir.path(), 2).expect("seed");
        assert_eq!(created.len(), 11);
        assert!(!created.contains(&kept));
        assert_eq!(
            fs::read_to_string(&kept).expect("kept"),
            "{\"pre-policy\": {}}\n"
        );
        let seeded = read_json_fixture(&dir.path().join("bmp-withdraw-loc-rib-step2.json"))
            .expect("seeded");
        assert_eq!(seeded, json!({}));

        assert!(seed_placeholder_fixtures(dir.path(), 2).expect("reseed").is_empty());
    }
}
