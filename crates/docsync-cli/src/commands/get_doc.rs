use anyhow::format_err;
use bson::Bson;
use crate::args::TargetArgs;
use docsync::{
    record::{self, id_to_string},
    KeyedStore,
    Result,
};

/// Get one stored document by its `_id` and print it as relaxed Extended JSON.
#[derive(clap::Args, Clone, Debug)]
pub struct Args {
    #[clap(flatten)]
    target: TargetArgs,

    /// The `_id` to look up, as Extended JSON.
    ///
    /// For example `1`, `'"AC"'`, or `'{"$oid": "64a5b5a8f73b2520d2d62df5"}'`.
    /// Text that is not valid JSON is used as a string id, so `AC` also works.
    #[arg(long)]
    id: String,
}

#[tracing::instrument(level = "trace")]
pub async fn main(args: Args) -> Result<()> {
    let id = record::parse_id(&*args.id)?;

    let store = args.target.store_options().build().await?;

    let doc = store.get(&id).await?
                   .ok_or_else(|| format_err!("No document found in {store} with _id={id}",
                                              store = store.describe(),
                                              id = id_to_string(&id)))?;

    let json = Bson::Document(doc).into_relaxed_extjson();
    serde_json::to_writer_pretty(&std::io::stdout(), &json)?;
    println!();

    Ok(())
}
