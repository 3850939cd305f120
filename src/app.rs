use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{self, Id};
use crate::config;
use crate::data::{MockBlog, Services};
use crate::loading::LoadingCounter;
use crate::logging;
use crate::media;
use crate::storage;
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    /// Open this post instead of the list.
    pub post_id: Option<Id>,
    /// Browse built-in sample data instead of the API.
    pub demo: bool,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_path.clone(),
        env_prefix: None,
    })
    .context("app: load config")?;
    logging::init(&cfg.log).context("app: init logging")?;

    let store =
        Arc::new(storage::Store::open(storage::Options::default()).context("app: open storage")?);
    let loader = media::CacheLoader::new(
        store.clone(),
        media::Config {
            cache_dir: cfg.media.cache_dir.clone(),
            max_size_bytes: cfg.media.max_size_bytes,
            default_ttl: cfg.media.default_ttl,
            http_client: None,
        },
    )
    .context("app: init image cache")?;
    let preloader = Arc::new(media::Preloader::new(Arc::new(loader), cfg.media.workers));

    let (services, source) = if options.demo {
        tracing::info!("app: running with sample data");
        (Services::from_mock(Arc::new(MockBlog::sample())), "sample data".to_string())
    } else {
        let client = api::Client::new(api::ClientConfig {
            base_url: cfg.api.base_url.clone(),
            user_agent: cfg.api.user_agent.clone(),
            timeout: Some(cfg.api.timeout),
            http_client: None,
        })
        .context("app: build api client")?;
        let source = client.base_url().trim_end_matches('/').to_string();
        tracing::info!(base_url = %source, "app: using blog api");
        (Services::from_client(Arc::new(client)), source)
    };

    let mut model = ui::Model::new(ui::Options {
        services,
        preloader,
        loading: LoadingCounter::new(),
        user_id: Id::new(cfg.api.user_id.clone()),
        words_per_minute: cfg.ui.words_per_minute,
        initial_post: options.post_id,
        source,
    });
    let result = model.run();
    drop(model);

    match Arc::try_unwrap(store) {
        Ok(store) => store.close().context("app: close storage")?,
        Err(_) => tracing::debug!("app: storage still shared at exit"),
    }

    result
}
