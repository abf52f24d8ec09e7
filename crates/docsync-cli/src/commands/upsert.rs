use anyhow::bail;
use crate::args::{FileArgs, JsonOutputArg, TargetArgs};
use docsync::{
    upsert_all,
    CollectionName,
    FailurePolicy,
    MemoryStore,
    RecordFailure,
    Result,
    UpsertOptions,
    UpsertReport,
};
use std::fmt::Write;

/// Upsert every document in a JSON file into a MongoDB collection, matching on `_id`.
///
/// Documents are written one at a time in file order. Fields in each document
/// overwrite the stored fields of the same name; other stored fields are kept.
/// Running the same file again is safe.
#[derive(clap::Args, Clone, Debug)]
pub struct Args {
    #[clap(flatten)]
    file: FileArgs,

    #[clap(flatten)]
    target: TargetArgs,

    /// What to do with documents that are invalid or that the server rejects.
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort, env = "DOCSYNC_ON_ERROR")]
    on_error: FailurePolicy,

    /// Load and validate the file and report what would be written, without connecting to MongoDB.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[clap(flatten)]
    json: JsonOutputArg,
}

/// Failures listed individually in the summary; the rest are counted.
const MAX_LISTED_FAILURES: usize = 10;

#[tracing::instrument(level = "trace")]
pub async fn main(args: Args) -> Result<()> {
    let report = run(&args).await?;
    println!("{line}", line = confirmation(&report, &args.target.collection, args.dry_run));

    Ok(())
}

/// Load the file and upsert it. Fails unless every document was written.
async fn run(args: &Args) -> Result<UpsertReport> {
    let records = args.file.file_spec().load()?;

    let opts = UpsertOptions {
        failure_policy: args.on_error,
        ..UpsertOptions::default()
    };

    let report = if args.dry_run {
        let store = MemoryStore::new();
        upsert_all(&records, &store, &opts).await?
    } else {
        let store = args.target.store_options().build().await?;
        upsert_all(&records, &store, &opts).await?
    };

    if args.json.value {
        serde_json::to_writer_pretty(&std::io::stdout(), &report)?;
        println!();
    }

    if !report.is_complete() {
        bail!(failure_summary(&report, &*args.target.collection.0));
    }

    Ok(report)
}

fn confirmation(report: &UpsertReport, collection: &CollectionName, dry_run: bool) -> String {
    let n = report.records_written();
    if dry_run {
        format!("Dry run: {n} documents would be upserted into the '{collection}' collection.")
    } else {
        format!("All {n} documents have been upserted into the '{collection}' collection.")
    }
}

fn failure_summary(report: &UpsertReport, collection: &str) -> String {
    let mut msg = format!(
        "{written} document(s) were upserted into the '{collection}' collection, \
         {failed} failed and {skipped} were skipped as invalid.",
        written = report.records_written(),
        failed = report.failed.len(),
        skipped = report.skipped.len());

    let failures: Vec<&RecordFailure> = report.skipped.iter().chain(report.failed.iter()).collect();

    for failure in failures.iter().take(MAX_LISTED_FAILURES) {
        let _ = write!(msg, "\n-   record #{index}{id}: {error}",
                       index = failure.index,
                       id = match failure.id.as_ref() {
                           Some(id) => format!(" id={id}"),
                           None => "".to_string(),
                       },
                       error = failure.error);
    }

    if failures.len() > MAX_LISTED_FAILURES {
        let _ = write!(msg, "\n-   ... and {more} more", more = failures.len() - MAX_LISTED_FAILURES);
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use docsync::RecordSet;
    use std::io::Write;

    fn dry_run_args(contents: &[u8], on_error: &str) -> (tempfile::NamedTempFile, Args) {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(contents).expect("write temp file");

        let cli = crate::Args::try_parse_from([
            "docsync", "upsert",
            "--file", file.path().to_str().expect("utf-8 temp path"),
            "--collection", "pets",
            "--on-error", on_error,
            "--dry-run",
        ]).expect("parse");

        let crate::Command::Upsert(args) = cli.command else {
            panic!("expected the upsert command");
        };

        (file, args)
    }

    #[tokio::test]
    async fn empty_file_still_confirms() {
        let (_file, args) = dry_run_args(b"[]", "abort");

        let report = run(&args).await.expect("run");

        assert_eq!(report.records_written(), 0);
        assert_eq!(confirmation(&report, &args.target.collection, false),
                   "All 0 documents have been upserted into the 'pets' collection.");
    }

    #[tokio::test]
    async fn valid_file() {
        let (_file, args) = dry_run_args(
            br#"[{"_id": 1, "name": "Fido"}, {"_id": 2, "name": "Tom"}]"#, "abort");

        let report = run(&args).await.expect("run");

        assert_eq!(report.inserted, 2);
        assert_eq!(confirmation(&report, &args.target.collection, true),
                   "Dry run: 2 documents would be upserted into the 'pets' collection.");
        main(args).await.expect("main");
    }

    #[tokio::test]
    async fn missing_id_fails_with_abort() {
        let (_file, args) = dry_run_args(br#"[{"_id": 1}, {"name": "no id"}]"#, "abort");

        let err = run(&args).await.expect_err("invalid record");

        assert!(err.to_string().starts_with("1 invalid record(s) in the input"), "err = {err}");
        assert!(main(args).await.is_err());
    }

    #[tokio::test]
    async fn missing_id_fails_with_continue() {
        let (_file, args) = dry_run_args(br#"[{"_id": 1}, {"name": "no id"}]"#, "continue");

        let err = run(&args).await.expect_err("skipped record");

        assert!(err.to_string().starts_with(
                    "1 document(s) were upserted into the 'pets' collection, \
                     0 failed and 1 were skipped as invalid."),
                "err = {err}");
        assert!(main(args).await.is_err());
    }

    #[tokio::test]
    async fn summary_lists_skipped_and_failed() {
        let records = RecordSet::from_json_slice(br#"[{"_id": 1}, {"name": "no id"}]"#, None)
                                .expect("parse");
        let opts = UpsertOptions {
            failure_policy: FailurePolicy::Continue,
            ..UpsertOptions::default()
        };
        let mut report = upsert_all(&records, &MemoryStore::new(), &opts).await
                             .expect("upsert_all");
        report.failed.push(RecordFailure {
            index: 5,
            id: Some("\"AC\"".to_string()),
            error: "server said no".to_string(),
        });

        let msg = failure_summary(&report, "airlines");

        assert!(msg.starts_with("1 document(s) were upserted into the 'airlines' collection, \
                                 1 failed and 1 were skipped as invalid."), "msg = {msg}");
        assert!(msg.contains("record #1: missing `_id` field"), "msg = {msg}");
        assert!(msg.contains("record #5 id=\"AC\": server said no"), "msg = {msg}");
    }
}
