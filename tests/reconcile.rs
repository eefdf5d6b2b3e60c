use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ingest_reconcile::confirm::confirm_all;
use ingest_reconcile::enumerate::enumerate_jobs;
use ingest_reconcile::ingest_check::find_uningested;
use ingest_reconcile::{
    CompletionTime, Concurrency, Deadline, EngineConfig, FileRecord, IndexError, JobId,
    LocalObjectStore, Point, PointQuery, PointQueryError, PointSource, Reconciler, RecordIndex,
    Report, RetryPolicy, StatsRecord,
};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

const PREFIX: &str = "s3://bucket/parquet/";

#[derive(Default)]
struct MemoryIndex {
    stats: Vec<StatsRecord>,
    files: Vec<FileRecord>,
    unreachable: BTreeSet<JobId>,
}

impl MemoryIndex {
    fn with_job(mut self, job: &str, location: &str) -> Self {
        self.stats.push(full_stats(&format!("{location}job_id={job}/part-0.parquet")));
        self
    }

    fn with_file(mut self, job: &str, source: &str, secs: i64) -> Self {
        self.files.push(FileRecord::new(
            JobId::new(job),
            source,
            CompletionTime::from_epoch_secs(secs).expect("valid time"),
        ));
        self
    }
}

#[async_trait]
impl RecordIndex for MemoryIndex {
    async fn scan_stats(
        &self,
        visit: &mut (dyn FnMut(StatsRecord) + Send),
    ) -> Result<u64, IndexError> {
        for record in &self.stats {
            visit(record.clone());
        }
        Ok(self.stats.len() as u64)
    }

    async fn files_for_job(&self, job: &JobId) -> Result<Vec<FileRecord>, IndexError> {
        if self.unreachable.contains(job) {
            return Err(IndexError::Decode("connection reset".to_string()));
        }
        Ok(self.files.iter().filter(|f| &f.job_id == job).cloned().collect())
    }

    async fn source_record_count(&self, location: &str) -> Result<u64, IndexError> {
        Ok(self.files.iter().filter(|f| f.location == location).count() as u64)
    }
}

#[derive(Default)]
struct CannedPoints {
    points: Vec<Point>,
    calls: AtomicUsize,
}

#[async_trait]
impl PointSource for CannedPoints {
    async fn fetch_points(&self, _query: &PointQuery) -> Result<Vec<Point>, PointQueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.points.clone())
    }
}

fn full_stats(location: &str) -> StatsRecord {
    StatsRecord {
        provider: Some("Saildrone".to_string()),
        project: Some("1021_atomic".to_string()),
        platform_code: Some("3B".to_string()),
        min_lon: Some(-30.0),
        min_lat: Some(10.0),
        max_lon: Some(-20.0),
        max_lat: Some(15.0),
        min_depth: Some(-5.0),
        max_depth: Some(0.0),
        min_datetime: Some(1_577_836_800.0),
        max_datetime: Some(1_577_923_200.0),
        ..StatsRecord::at(location)
    }
}

fn point(job: &str) -> Point {
    Point {
        time: Some("2020-01-01T06:00:00Z".to_string()),
        latitude: Some(12.0),
        longitude: Some(-25.0),
        depth: Some(0.0),
        job_id: Some(job.to_string()),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        concurrency: Concurrency::new(Some(4)),
        fetch_retry: RetryPolicy::index_fetch().with_initial_delay(Duration::from_millis(1)),
        ..EngineConfig::new(PREFIX)
    }
}

fn jobs(ids: &[&str]) -> BTreeSet<JobId> {
    ids.iter().map(|id| JobId::new(*id)).collect()
}

#[tokio::test]
async fn enumeration_keeps_only_jobs_under_prefix() {
    let index = MemoryIndex::default()
        .with_job("a", PREFIX)
        .with_job("b", PREFIX)
        .with_job("a", PREFIX)
        .with_job("c", "s3://bucket/elsewhere/");
    let mut rng = StdRng::seed_from_u64(7);

    let enumeration = enumerate_jobs(&index, PREFIX, &mut rng).await.expect("scan");

    assert_eq!(enumeration.jobs, jobs(&["a", "b"]));
    assert_eq!(enumeration.counts.scanned, 4);
    assert_eq!(enumeration.counts.skipped, 1);
    assert_eq!(enumeration.counts.added, 3);
    assert_eq!(enumeration.stats.len(), 2);
}

#[tokio::test]
async fn earlier_job_sharing_a_source_is_confirmed() {
    let index = MemoryIndex::default()
        .with_job("A", PREFIX)
        .with_job("B", PREFIX)
        .with_file("A", "s3://in/f1.json", 200)
        .with_file("B", "s3://in/f1.json", 100)
        .with_file("A", "s3://in/f2.json", 200);
    let points = CannedPoints::default();
    let mut rng = StdRng::seed_from_u64(1);

    let report = Reconciler::new(&index, &points, config())
        .run(&mut rng)
        .await
        .expect("run");

    assert_eq!(report.confirmed, jobs(&["B"]));
    assert!(report.suspected.is_empty());
    assert!(report.missing_evidence.is_empty());
    assert_eq!(points.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn job_without_stats_is_missing_evidence_without_a_query() {
    let points = CannedPoints::default();
    let confirmation = confirm_all(&points, &jobs(&["C"]), &HashMap::new(), 100).await;

    assert_eq!(confirmation.missing_evidence, jobs(&["C"]));
    assert!(confirmation.confirmed.is_empty());
    assert!(confirmation.suspected.is_empty());
    assert_eq!(points.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overlapping_points_confirm_a_job_without_file_records() {
    let index = MemoryIndex::default().with_job("D", PREFIX);
    let points = CannedPoints {
        points: vec![point("D"), point("X")],
        ..CannedPoints::default()
    };
    let mut rng = StdRng::seed_from_u64(2);

    let report = Reconciler::new(&index, &points, config())
        .run(&mut rng)
        .await
        .expect("run");

    assert_eq!(report.confirmed, jobs(&["D"]));
    assert_eq!(points.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_job_falls_back_and_is_reported() {
    let mut index = MemoryIndex::default()
        .with_job("E", PREFIX)
        .with_job("F", PREFIX)
        .with_file("F", "s3://in/f.json", 100);
    index.unreachable.insert(JobId::new("E"));
    let points = CannedPoints {
        points: vec![point("E"), point("E")],
        ..CannedPoints::default()
    };
    let mut rng = StdRng::seed_from_u64(3);

    let report = Reconciler::new(&index, &points, config())
        .run(&mut rng)
        .await
        .expect("run");

    assert!(report.confirmed.is_empty());
    assert_eq!(report.missing_evidence, jobs(&["E"]));
    assert_eq!(report.fetch_failed, jobs(&["E"]));
}

#[tokio::test]
async fn clean_run_still_produces_a_report() {
    let index = MemoryIndex::default()
        .with_job("solo", PREFIX)
        .with_file("solo", "s3://in/only.json", 100);
    let points = CannedPoints::default();
    let mut rng = StdRng::seed_from_u64(4);

    let report = Reconciler::new(&index, &points, config())
        .run(&mut rng)
        .await
        .expect("run");
    assert_eq!(report, Report::default());

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("search_result.json");
    report.write_json(&path).expect("write");
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(written["confirmed_duplicates"], serde_json::json!([]));
}

#[tokio::test]
async fn ingest_check_reports_sources_without_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    for key in ["raw/a.json", "raw/b.json.gz", "raw/c.txt", "raw/sub/d.json"] {
        let path = dir.path().join(key);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, b"{}").expect("write");
    }
    let store = LocalObjectStore::new(dir.path());
    let index = MemoryIndex::default().with_file("j", "s3://bkt/raw/a.json", 100);

    let report = find_uningested(
        &index,
        &store,
        "bkt",
        "raw/",
        Concurrency::new(Some(2)),
        &RetryPolicy::index_fetch(),
        Deadline::none(),
    )
    .await
    .expect("check");

    assert_eq!(report.s3_url, "s3://bkt/raw/");
    assert_eq!(report.total_checked, 3);
    assert_eq!(report.total_uningested, 2);
    assert_eq!(
        report.uningested_urls,
        vec!["s3://bkt/raw/b.json.gz", "s3://bkt/raw/sub/d.json"]
    );
}
