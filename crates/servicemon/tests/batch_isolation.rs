use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use servicemon::batch::BatchRunner;
use servicemon::models::QueryParams;
use servicemon::report::NO_STATS_SENTINEL;
use servicemon::resolve::{DefaultCoordinateResolver, PositionDescriptor, ServiceTarget};
use servicemon::transport::{AttemptError, Transport, TransportConfig, TransportResponse};
use servicemon::votable::VoTableReader;

const TWO_COLUMN_TABLE: &str = "<VOTABLE><RESOURCE><TABLE>\
<FIELD name=\"a\"/><FIELD name=\"b\"/>\
<DATA><TABLEDATA><TR><TD>1</TD><TD>2</TD></TR></TABLEDATA></DATA>\
</TABLE></RESOURCE></VOTABLE>";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

/// Serves a table for every URL except those containing `broken`.
struct PartlyBroken {
    calls: AtomicUsize,
}

impl Transport for PartlyBroken {
    fn get(&self, url: &str, _params: &QueryParams) -> Result<TransportResponse, AttemptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("broken") {
            return Err(AttemptError::Permanent("connection refused".to_string()));
        }
        Ok(TransportResponse {
            status: 200,
            final_url: url.to_string(),
            body: Box::new(Cursor::new(TWO_COLUMN_TABLE.as_bytes().to_vec())),
        })
    }
}

fn fast_config() -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_secs(5),
        max_attempts: 1,
        initial_backoff: Duration::ZERO,
    }
}

#[test]
fn failed_combinations_are_dropped_and_the_rest_reported() {
    let transport = PartlyBroken {
        calls: AtomicUsize::new(0),
    };
    let services = [
        ServiceTarget::from_url("Good", "cone", "http://good.example/cone?"),
        ServiceTarget::from_url("Bad", "cone", "http://broken.example/cone?"),
    ];
    let positions = [
        PositionDescriptor::Pair(10.0, 20.0),
        PositionDescriptor::Text("not a position".to_string()),
        PositionDescriptor::Pair(30.0, -40.0),
    ];
    let radii = [0.1, 0.2];

    let report = BatchRunner::new(&transport, &DefaultCoordinateResolver, &VoTableReader)
        .with_transport_config(fast_config())
        .with_concurrency(3)
        .run(
            &services,
            &positions,
            &radii,
            &unique_temp_dir("servicemon-batch-isolation"),
        );

    // 12 combinations: 4 unparseable positions, 4 against the broken host.
    assert_eq!(report.stats.len(), 4);
    assert_eq!(report.failures.len(), 8);
    assert_eq!(report.skipped, 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 8);
    assert!(report.stats.iter().all(|stats| stats.base_name() == "Good"));

    let mut kinds = report
        .failures
        .iter()
        .map(|failure| failure.kind.as_str())
        .collect::<Vec<_>>();
    kinds.sort_unstable();
    kinds.dedup();
    assert_eq!(kinds, ["configuration", "transport"]);

    let csv = report.render_csv();
    assert_eq!(csv.lines().count(), 5);
    assert!(csv.starts_with("name,start_time,end_time,"));
}

#[test]
fn nothing_succeeding_renders_the_sentinel() {
    let transport = PartlyBroken {
        calls: AtomicUsize::new(0),
    };
    let services = [ServiceTarget::from_url(
        "Bad",
        "cone",
        "http://broken.example/cone?",
    )];

    let report = BatchRunner::new(&transport, &DefaultCoordinateResolver, &VoTableReader)
        .with_transport_config(fast_config())
        .run(
            &services,
            &[PositionDescriptor::Pair(1.0, 2.0)],
            &[0.5],
            &unique_temp_dir("servicemon-batch-empty"),
        );

    assert!(report.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].intervals_recorded, 1);
    assert_eq!(report.render_csv(), format!("{NO_STATS_SENTINEL}\n"));
}

#[test]
fn empty_inputs_run_nothing() {
    let transport = PartlyBroken {
        calls: AtomicUsize::new(0),
    };
    let report = BatchRunner::new(&transport, &DefaultCoordinateResolver, &VoTableReader).run(
        &[],
        &[PositionDescriptor::Pair(1.0, 2.0)],
        &[0.5],
        &unique_temp_dir("servicemon-batch-noinput"),
    );

    assert!(report.is_empty());
    assert!(report.failures.is_empty());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancelled_batch_starts_nothing_new() {
    let transport = PartlyBroken {
        calls: AtomicUsize::new(0),
    };
    let cancel = AtomicBool::new(true);
    let services = [ServiceTarget::from_url("Good", "cone", "http://good.example/cone?")];

    let report = BatchRunner::new(&transport, &DefaultCoordinateResolver, &VoTableReader)
        .with_cancel_flag(&cancel)
        .run(
            &services,
            &[PositionDescriptor::Pair(1.0, 2.0)],
            &[0.1, 0.2, 0.3],
            &unique_temp_dir("servicemon-batch-cancel"),
        );

    assert!(report.is_empty());
    assert_eq!(report.skipped, 3);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_workers_report_every_combination_once() {
    let transport = PartlyBroken {
        calls: AtomicUsize::new(0),
    };
    let services = [ServiceTarget::from_url("Good", "cone", "http://good.example/cone?")];
    let positions = (0..5)
        .map(|index| PositionDescriptor::Pair(f64::from(index) * 10.0, 0.0))
        .collect::<Vec<_>>();

    let report = BatchRunner::new(&transport, &DefaultCoordinateResolver, &VoTableReader)
        .with_transport_config(fast_config())
        .with_concurrency(4)
        .run(
            &services,
            &positions,
            &[0.1, 0.2],
            &unique_temp_dir("servicemon-batch-concurrent"),
        );

    let mut names = report
        .stats
        .iter()
        .map(|stats| stats.name().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 10);
    assert!(names.contains(&"Good_cone_0_0_0.1".to_string()));
    assert!(names.contains(&"Good_cone_40_0_0.2".to_string()));
}

#[test]
fn equivalent_positions_share_one_payload_and_the_repeat_fails() {
    let transport = PartlyBroken {
        calls: AtomicUsize::new(0),
    };
    let services = [ServiceTarget::from_url("Good", "cone", "http://good.example/cone?")];
    let positions = [
        PositionDescriptor::Pair(10.0, 20.0),
        PositionDescriptor::Text("10 20".to_string()),
    ];

    let report = BatchRunner::new(&transport, &DefaultCoordinateResolver, &VoTableReader)
        .with_transport_config(fast_config())
        .with_concurrency(2)
        .run(
            &services,
            &positions,
            &[0.1],
            &unique_temp_dir("servicemon-batch-duplicate"),
        );

    assert_eq!(report.stats.len(), 1);
    assert_eq!(report.stats[0].name(), "Good_cone_10_20_0.1");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, "configuration");
    assert_eq!(report.failures[0].label, "Good_cone_10_20_0.1");
    assert!(report.failures[0].message.contains("duplicate query identity"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}
