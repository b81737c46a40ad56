use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use peercache::builder::Builder;
use peercache::config::Config;
use peercache::fmt::{format_duration, parse_size};
use peercache::group::{GroupRegistry, Loader};
use peercache::platform::Platform;
use peercache::pool::HttpPool;
use peercache::server::PeerServer;
use yaml_rust::Yaml;

/// Emulates a slow database which serves the values listed in the config of a group.
struct StaticLoader {
    group: String,
    data: HashMap<String, Vec<u8>>,
}

impl StaticLoader {
    fn from_config(group: &str, settings: &Yaml) -> Self {
        let data = settings["data"]
            .as_hash()
            .map(|data| {
                data.iter()
                    .filter_map(|(key, value)| Some((scalar(key)?, scalar(value)?.into_bytes())))
                    .collect()
            })
            .unwrap_or_default();

        StaticLoader {
            group: group.to_owned(),
            data,
        }
    }
}

#[async_trait::async_trait]
impl Loader for StaticLoader {
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        log::info!("[SlowDB] Searching {} in {}...", key, self.group);
        self.data
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
    }
}

fn scalar(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(value) | Yaml::Real(value) => Some(value.clone()),
        Yaml::Integer(value) => Some(value.to_string()),
        Yaml::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}

fn max_memory(settings: &Yaml) -> anyhow::Result<usize> {
    match &settings["max_memory"] {
        Yaml::Integer(size) => usize::try_from(*size).context("max_memory must not be negative"),
        Yaml::String(size) => parse_size(size),
        _ => Ok(0),
    }
}

/// Creates all groups listed in the **groups** section of the config.
fn setup_groups(platform: &Arc<Platform>) -> anyhow::Result<()> {
    let registry = platform.require::<GroupRegistry>();
    let pool = platform.require::<HttpPool>();
    let handle = platform.require::<Config>().current();

    if let Some(groups) = handle.query("groups").as_hash() {
        for (name, settings) in groups {
            let name = scalar(name).context("Group names must be scalar values")?;
            let max_memory = max_memory(settings)
                .with_context(|| format!("Invalid max_memory for group {}", name))?;

            let group = registry.create_group(
                &name,
                max_memory,
                StaticLoader::from_config(&name, settings),
            )?;
            group.register_peers(pool.clone());
        }
    }

    if registry.names().is_empty() {
        log::warn!("No groups have been configured. This node will only answer with 404s.");
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let started = Instant::now();

    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // Create the groups as configured in settings.yml...
    if let Err(error) = setup_groups(&platform) {
        log::error!("Failed to setup groups: {:#}", error);
        platform.terminate();
        return;
    }

    let registry = platform.require::<GroupRegistry>();
    platform.require::<PeerServer>().event_loop().await;

    for name in registry.names() {
        if let Some(group) = registry.lookup_group(&name) {
            log::info!("Group {}: {}", name, group.stats());
        }
    }
    log::info!("Node stopped after {}.", format_duration(started.elapsed()));
}

#[cfg(test)]
mod tests {
    use crate::{max_memory, StaticLoader};
    use peercache::group::Loader;
    use yaml_rust::YamlLoader;

    #[test]
    fn groups_are_read_from_the_config() {
        let docs = YamlLoader::load_from_str(
            "
max_memory: 2k
data:
    Tom: 630
    Jack: 589
    42: answer
",
        )
        .unwrap();
        let settings = &docs[0];

        assert_eq!(max_memory(settings).unwrap(), 2048);

        let loader = StaticLoader::from_config("scores", settings);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(loader.load("Tom").await.unwrap(), b"630");
            assert_eq!(loader.load("42").await.unwrap(), b"answer");
            assert_eq!(
                loader.load("Sam").await.unwrap_err().to_string(),
                "Sam not exist"
            );
        });
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let docs = YamlLoader::load_from_str("max_memory: -1").unwrap();
        assert!(max_memory(&docs[0]).is_err());

        let docs = YamlLoader::load_from_str("data: {}").unwrap();
        assert_eq!(max_memory(&docs[0]).unwrap(), 0);
    }
}
