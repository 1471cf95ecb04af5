//! Configuration loading with env-var overrides.
//!
//! Reads a TOML file, follows `[meta] base = "..."` inheritance chains, and
//! applies `RAGKB_WORK_DIR` / `RAGKB_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::RawConfig;
use super::types::*;

/// Deep-merge two TOML values. Tables merge recursively — the overlay only
/// needs to specify keys that differ from the base. Any other value type
/// replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply
/// env-var overrides. If no path is given and `config/default.toml` does not
/// exist, returns a hardcoded minimal default.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("RAGKB_WORK_DIR").ok();
    let log_level_override = env::var("RAGKB_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        let work_dir_str = work_dir_override.unwrap_or_else(|| "~/.ragkb".to_string());
        let work_dir = expand_home(&work_dir_str);
        let log_level = log_level_override.unwrap_or_else(|| "info".to_string());
        Ok(hardcoded_default(work_dir, log_level))
    }
}

fn hardcoded_default(work_dir: PathBuf, log_level: String) -> Config {
    Config {
        metadata: MetadataConfig {
            db_path: work_dir.join("metadata.sqlite3"),
        },
        vectorstore: VectorStoreConfig {
            db_path: work_dir.join("vectors.sqlite3"),
            dim: 768,
        },
        lexical: LexicalConfig {
            db_path: work_dir.join("lexical.sqlite3"),
        },
        work_dir,
        log_level,
        http: HttpConfig {
            bind: "127.0.0.1:8080".to_string(),
        },
        model_gateway: ModelGatewayConfig {
            provider: "dummy".to_string(),
            embed_base_url: String::new(),
            rerank_base_url: String::new(),
            generate_base_url: String::new(),
            api_key: env::var("RAGKB_MODEL_API_KEY").ok(),
            embed_model: "text-embedding".to_string(),
            rerank_model: "rerank".to_string(),
            generate_model: "gpt-4o-mini".to_string(),
            timeout_seconds: 60,
            max_concurrent_requests: 8,
            rate_limit_per_minute: 600,
            max_retries: 3,
        },
        status_sync: StatusSyncConfig {
            callback_url: None,
            worker_count: 2,
            queue_capacity: 1024,
            max_retries: 3,
        },
        retrieval: RetrievalConfig {
            top_k: 5,
            candidate_k: 100,
            rerank_k: 20,
            alpha: 0.5,
            history_max: 10,
            context_max: 4000,
        },
        chunker: ChunkerConfig {
            emit_page_summary: false,
        },
        ingestion: IngestionConfig {
            queue_capacity: 256,
            parse_concurrency: 4,
            vectorize_concurrency: 4,
            general_concurrency: 8,
            resume_grace_period_secs: 600,
        },
    }
}

/// Internal loader — accepts an explicit path and optional overrides. Tests
/// pass overrides directly instead of mutating env vars. Follows
/// `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val)
        .map_err(|e: toml::de::Error| {
            AppError::Config(format!("config error in {}: {e}", path.display()))
        })?;

    let work_dir_str = work_dir_override
        .unwrap_or(&parsed.service.work_dir)
        .to_string();
    let work_dir = expand_home(&work_dir_str);
    let log_level = log_level_override
        .unwrap_or(&parsed.service.log_level)
        .to_string();

    let resolve = |p: Option<String>, default_name: &str| -> PathBuf {
        match p {
            Some(p) => {
                let pb = PathBuf::from(p);
                if pb.is_absolute() { pb } else { work_dir.join(pb) }
            }
            None => work_dir.join(default_name),
        }
    };

    Ok(Config {
        metadata: MetadataConfig {
            db_path: resolve(parsed.metadata.db_path, "metadata.sqlite3"),
        },
        vectorstore: VectorStoreConfig {
            db_path: resolve(parsed.vectorstore.db_path, "vectors.sqlite3"),
            dim: parsed.vectorstore.dim,
        },
        lexical: LexicalConfig {
            db_path: resolve(parsed.lexical.db_path, "lexical.sqlite3"),
        },
        work_dir,
        log_level,
        http: HttpConfig {
            bind: parsed.http.bind,
        },
        model_gateway: ModelGatewayConfig {
            provider: parsed.model_gateway.provider,
            embed_base_url: parsed.model_gateway.embed_base_url,
            rerank_base_url: parsed.model_gateway.rerank_base_url,
            generate_base_url: parsed.model_gateway.generate_base_url,
            api_key: env::var("RAGKB_MODEL_API_KEY").ok(),
            embed_model: parsed.model_gateway.embed_model,
            rerank_model: parsed.model_gateway.rerank_model,
            generate_model: parsed.model_gateway.generate_model,
            timeout_seconds: parsed.model_gateway.timeout_seconds,
            max_concurrent_requests: parsed.model_gateway.max_concurrent_requests,
            rate_limit_per_minute: parsed.model_gateway.rate_limit_per_minute,
            max_retries: parsed.model_gateway.max_retries,
        },
        status_sync: StatusSyncConfig {
            callback_url: parsed.status_sync.callback_url,
            worker_count: parsed.status_sync.worker_count,
            queue_capacity: parsed.status_sync.queue_capacity,
            max_retries: parsed.status_sync.max_retries,
        },
        retrieval: RetrievalConfig {
            top_k: parsed.retrieval.top_k,
            candidate_k: parsed.retrieval.candidate_k,
            rerank_k: parsed.retrieval.rerank_k,
            alpha: parsed.retrieval.alpha,
            history_max: parsed.retrieval.history_max,
            context_max: parsed.retrieval.context_max,
        },
        chunker: ChunkerConfig {
            emit_page_summary: parsed.chunker.emit_page_summary,
        },
        ingestion: IngestionConfig {
            queue_capacity: parsed.ingestion.queue_capacity,
            parse_concurrency: parsed.ingestion.parse_concurrency,
            vectorize_concurrency: parsed.ingestion.vectorize_concurrency,
            general_concurrency: parsed.ingestion.general_concurrency,
            resume_grace_period_secs: parsed.ingestion.resume_grace_period_secs,
        },
    })
}

/// Expand a leading `~` to the user's home directory. Absolute or relative
/// paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[service]
work_dir = "~/.ragkb"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.ragkb");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".ragkb"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config error"));
    }

    #[test]
    fn env_overrides_applied() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/test-override"));
        assert_eq!(cfg.log_level, "debug");
    }

    const BASE_TOML: &str = r#"
[service]
work_dir = "~/.ragkb"
log_level = "info"

[retrieval]
top_k = 5
alpha = 0.3
"#;

    fn write_named(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let p = dir.path().join(name);
        fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn overlay_keeps_base_fields_and_overrides_scalar() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = r#"
[meta]
base = "base.toml"

[retrieval]
alpha = 0.7
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, None, None).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.alpha, 0.7);
    }

    #[test]
    fn chained_bases() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "grandbase.toml", BASE_TOML);
        let middle = r#"
[meta]
base = "grandbase.toml"

[service]
log_level = "warn"
"#;
        write_named(&dir, "middle.toml", middle);
        let top = r#"
[meta]
base = "middle.toml"

[retrieval]
top_k = 8
"#;
        let top_path = write_named(&dir, "top.toml", top);
        let cfg = load_from(&top_path, None, None).unwrap();
        assert_eq!(cfg.log_level, "warn");
        assert_eq!(cfg.retrieval.top_k, 8);
    }

    #[test]
    fn missing_base_errors() {
        let dir = TempDir::new().unwrap();
        let overlay = r#"
[meta]
base = "nonexistent.toml"

[service]
work_dir = "~/.ragkb"
log_level = "info"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let result = load_from(&overlay_path, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn cycle_detection() {
        let dir = TempDir::new().unwrap();
        let self_path = dir.path().join("self.toml");
        let content = format!("[meta]\nbase = \"{}\"\n\n{BASE_TOML}", self_path.display());
        fs::write(&self_path, content).unwrap();
        let result = load_from(&self_path, None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("circular"));
    }
}
