use anyhow::bail;
use crate::args::{FileArgs, JsonOutputArg};
use docsync::Result;

/// Load and validate an input file without connecting to a database.
///
/// Reports the file size, the count of documents, and every document that
/// would be rejected. Exits with an error if any document is invalid.
#[derive(clap::Args, Clone, Debug)]
pub struct Args {
    #[clap(flatten)]
    file: FileArgs,

    #[clap(flatten)]
    json: JsonOutputArg,
}

#[tracing::instrument(level = "trace")]
pub async fn main(args: Args) -> Result<()> {
    let file_spec = args.file.file_spec();
    let records = file_spec.load()?;
    let summary = records.summary(&file_spec);

    if args.json.value {
        serde_json::to_writer_pretty(&std::io::stdout(), &summary)?;
        println!();
    } else {
        println!("file:            {path}", path = summary.file.path.display());
        println!("size:            {len}", len = summary.file_len);
        println!("elements:        {n}", n = summary.elements_total);
        println!("valid records:   {n}", n = summary.records_valid);
        println!("invalid records: {n}", n = summary.invalid.len());
        for invalid in summary.invalid.iter() {
            println!("-   {invalid}");
        }
    }

    if !summary.invalid.is_empty() {
        bail!("{n} invalid record(s) in '{path}'",
              n = summary.invalid.len(),
              path = summary.file.path.display());
    }

    Ok(())
}
