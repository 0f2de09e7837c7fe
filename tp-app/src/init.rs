//! Configuration scaffolding for `taskpilot init`.
//!
//! Initializes `~/.taskpilot/` from the repository template without
//! overwriting existing local files.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

const CONFIG_TEMPLATE: &str = include_str!("../config-templates/config.toml");

pub async fn initialize_default() -> Result<InitReport> {
    let config_path = crate::config::default_config_path();
    let root = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid default config path: {}", config_path.display()))?
        .to_path_buf();
    initialize_at_root(&root).await
}

pub async fn initialize_at_root(root: &Path) -> Result<InitReport> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        created: Vec::new(),
        skipped: Vec::new(),
    };

    let target = root.join("config.toml");
    match tokio::fs::metadata(&target).await {
        Ok(_) => {
            report.skipped.push(target);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::write(&target, CONFIG_TEMPLATE)
                .await
                .map_err(|e| anyhow::anyhow!("write config template {}: {e}", target.display()))?;
            report.created.push(target);
        }
        Err(err) => {
            return Err(anyhow::anyhow!(
                "inspect config path {}: {err}",
                target.display()
            ));
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::initialize_at_root;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("taskpilot-init-{name}-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn init_creates_the_config_template() {
        let root = temp_root("create");
        let report = initialize_at_root(&root).await.expect("init succeeds");

        assert_eq!(report.created.len(), 1);
        assert!(report.skipped.is_empty());
        assert!(root.join("config.toml").exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn init_is_idempotent_and_never_overwrites() {
        let root = temp_root("idempotent");
        initialize_at_root(&root).await.expect("first init");
        std::fs::write(root.join("config.toml"), "# edited by hand\n").expect("edit");

        let second = initialize_at_root(&root).await.expect("second init");
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), 1);
        let contents = std::fs::read_to_string(root.join("config.toml")).expect("read");
        assert_eq!(contents, "# edited by hand\n");

        let _ = std::fs::remove_dir_all(root);
    }
}
