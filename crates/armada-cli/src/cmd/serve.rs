use anyhow::Context;
use armada_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, bind: Option<String>) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config (run `armada init`)")?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    for w in config.validate() {
        tracing::warn!("config: {}", w.message);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(armada_server::serve(root.to_path_buf(), config))
}
