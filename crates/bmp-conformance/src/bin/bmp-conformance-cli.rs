#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use bmp_conformance::{
    HarnessConfig, PeerConstraints, PeerRequest, PrefixRequest, SeqCursor, ShellHarness,
    init_tracing, seed_placeholder_fixtures,
};
use bmp_types::{MessageType, Policy};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config_path: Option<PathBuf> = None;
    let mut log_file: Option<PathBuf> = None;
    let mut fixture_root: Option<PathBuf> = None;
    let mut snapshot_root: Option<PathBuf> = None;
    let mut vrf: Option<String> = None;
    let mut cursor = SeqCursor::default();
    let mut update_expected = false;
    let mut prefixes: Vec<String> = Vec::new();
    let mut peers: Vec<String> = Vec::new();
    let mut log_type: Option<MessageType> = None;
    let mut policies: Vec<Policy> = Vec::new();
    let mut step = 1_u32;
    let mut constraints = PeerConstraints::default();
    let mut sync = false;
    let mut seed_steps: Option<u32> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().ok_or("--config requires a path")?.into()),
            "--log-file" => {
                log_file = Some(args.next().ok_or("--log-file requires a path")?.into());
            }
            "--fixtures" => {
                fixture_root = Some(args.next().ok_or("--fixtures requires a directory")?.into());
            }
            "--snapshots" => {
                snapshot_root = Some(args.next().ok_or("--snapshots requires a directory")?.into());
            }
            "--vrf" => vrf = Some(args.next().ok_or("--vrf requires a name")?),
            "--cursor" => {
                let value = args.next().ok_or("--cursor requires a sequence number")?;
                cursor = SeqCursor::new(value.parse().map_err(|err| format!("--cursor: {err}"))?);
            }
            "--update-expected" => update_expected = true,
            "--prefix" => prefixes.push(args.next().ok_or("--prefix requires a prefix")?),
            "--peer" => peers.push(args.next().ok_or("--peer requires an address")?),
            "--type" => {
                let value = args.next().ok_or("--type requires a message type (e.g. update)")?;
                log_type = Some(MessageType::from(value.as_str()));
            }
            "--policy" => {
                let value = args.next().ok_or("--policy requires pre-policy, post-policy or loc-rib")?;
                policies.push(Policy::from(value.as_str()));
            }
            "--step" => {
                let value = args.next().ok_or("--step requires a number")?;
                step = value.parse().map_err(|err| format!("--step: {err}"))?;
            }
            "--rd-instance" => constraints.rd_instance = true,
            "--peer-bgp-id" => {
                constraints.peer_bgp_id = Some(args.next().ok_or("--peer-bgp-id requires an id")?);
            }
            "--peer-distinguisher" => {
                constraints.peer_distinguisher =
                    Some(args.next().ok_or("--peer-distinguisher requires a value")?);
            }
            "--open-as" => {
                let value = args.next().ok_or("--open-as requires an AS number")?;
                constraints.open_as = Some(value.parse().map_err(|err| format!("--open-as: {err}"))?);
            }
            "--open-bgp-id" => {
                constraints.open_bgp_id = Some(args.next().ok_or("--open-bgp-id requires an id")?);
            }
            "--sync" => sync = true,
            "--seed-fixtures" => {
                let value = args.next().ok_or("--seed-fixtures requires a step count")?;
                seed_steps = Some(value.parse().map_err(|err| format!("--seed-fixtures: {err}"))?);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = match &config_path {
        Some(path) => HarnessConfig::from_yaml_path(path)?,
        None => HarnessConfig::default_paths(),
    }
    .with_env_overrides();
    if let Some(path) = log_file {
        config.log_folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.log_file = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or("--log-file must name a file")?
            .to_owned();
    }
    if let Some(root) = fixture_root {
        config.fixture_root = root;
    }
    if snapshot_root.is_some() {
        config.snapshot_root = snapshot_root;
    }
    if vrf.is_some() {
        config.vrf = vrf;
    }
    config.update_expected |= update_expected;

    if let Some(steps) = seed_steps {
        for path in seed_placeholder_fixtures(&config.fixture_root, steps)? {
            println!("seeded {}", path.display());
        }
        return Ok(());
    }

    let harness = ShellHarness::from_config(config);

    if sync {
        harness.sync_to_log_tail(&mut cursor)?;
        println!("cursor={cursor}");
        return Ok(());
    }

    if !peers.is_empty() {
        let request = PeerRequest::new(peers, log_type.unwrap_or(MessageType::PeerUp))
            .with_constraints(constraints);
        let found = harness.check_peers(&request, &mut cursor)?;
        println!(
            "peers={} type={} found={found} cursor={cursor}",
            request.peers.join(","),
            request.log_type
        );
        if !found {
            return Err("expected peers are missing from the bmp log".into());
        }
        return Ok(());
    }

    if !prefixes.is_empty() {
        if policies.is_empty() {
            policies.push(Policy::PrePolicy);
        }
        let log_type = log_type.unwrap_or(MessageType::Update);
        let views = policies
            .into_iter()
            .map(|policy| PrefixRequest::new(prefixes.iter().cloned(), log_type.clone(), policy, step))
            .collect::<Vec<_>>();
        let outcome = harness.check_step(&views, &mut cursor)?;
        for (request, view) in views.iter().zip(&outcome.views) {
            println!(
                "fixture={} matched={} passed={}",
                request.fixture_name(),
                view.matched,
                view.passed()
            );
            if let Some(golden) = &view.golden {
                println!(
                    "wrote actual={} ipv4={} ipv6={}",
                    golden.actual.display(),
                    golden.ipv4.display(),
                    golden.ipv6.display()
                );
            }
            if let Some(diff) = &view.diff {
                println!("{diff}");
            }
        }
        println!("cursor={cursor}");
        let failed = outcome.failures().count();
        if failed > 0 {
            return Err(format!("{failed} of {} views differ from their fixtures", views.len()).into());
        }
        return Ok(());
    }

    let unread = harness.unread_records(&cursor)?;
    let newest = unread.last().map_or(cursor.get(), |record| record.seq);
    println!("unread={} newest_seq={newest} cursor={cursor}", unread.len());
    Ok(())
}

fn print_help() {
    println!(
        "bmp-conformance-cli\n\
         Usage:\n\
         \tbmp-conformance-cli [--config harness.yaml] [--cursor N] --prefix P... [--type update|withdraw] [--policy P...] [--step N]\n\
         \tbmp-conformance-cli [--config harness.yaml] [--cursor N] --peer IP... [--type \"peer up\"] [peer constraints]\n\
         Options:\n\
         \t--config <path>        Harness YAML (log_folder, fixture_root, vrf, exec prefixes)\n\
         \t--log-file <path>      Collector log to read (overrides the config)\n\
         \t--fixtures <dir>       Directory holding bmp-<type>-<policy>-step<N>.json fixtures\n\
         \t--snapshots <dir>      Parent of the tmp/ directory golden snapshots go to\n\
         \t--vrf <name>           VRF used for the show bgp snapshots\n\
         \t--cursor <seq>         Only consider events with a greater seq (default 0)\n\
         \t--update-expected      Write golden snapshots when the observed prefixes cover the request\n\
         \t--prefix <prefix>      Expected prefix (repeatable)\n\
         \t--peer <address>       Expected peer (repeatable); 0.0.0.0 stands for loc-rib\n\
         \t--type <type>          Message type (default: update for prefixes, peer up for peers)\n\
         \t--policy <policy>      pre-policy (default), post-policy or loc-rib (repeatable; views share one window)\n\
         \t--step <n>             Test step number used in fixture names (default 1)\n\
         \t--rd-instance          Only route distinguisher instance peers\n\
         \t--peer-bgp-id <id>     Require this peer BGP identifier\n\
         \t--peer-distinguisher <rd>  Require this peer distinguisher\n\
         \t--open-as <asn>        Require this AS in both sent and received OPEN\n\
         \t--open-bgp-id <id>     Require this BGP id in both sent and received OPEN\n\
         \t--sync                 Advance the cursor past everything already logged and print it\n\
         \t--seed-fixtures <n>    Create empty fixtures for steps 1..=n that do not exist yet\n\
         \t-h, --help             Show this help\n\
         Environment:\n\
         \tBMP_UPDATE_EXPECTED=1  Same as --update-expected\n\
         \tRUST_LOG               Log filter (default info)"
    );
}
