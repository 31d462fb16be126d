use crate::config::Config;
use crate::utils::{ensure_dir, get_oxicrab_home};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[allow(unused_imports)]
use tracing::warn;

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_oxicrab_home()?.join("config.json"))
}

/// Path to the project-local settings layer: `.oxicrab/config.json` under
/// the current working directory. Absent unless the caller is running from
/// inside a project that opted into local overrides.
fn project_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".oxicrab")
        .join("config.json")
}

/// Reads one JSON settings layer, applying the same lock/migrate mechanics
/// as the single-file loader this generalizes. Returns `Ok(None)` if the
/// layer's file doesn't exist — a missing layer is not an error, just a
/// no-op in the merge chain.
fn read_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    // Acquire shared (read) lock — allows concurrent readers, blocks during writes
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open config layer at {}", path.display()))?;
    file.lock_shared()
        .with_context(|| "Failed to acquire shared lock on config layer")?;

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config layer from {}", path.display()))?;
    // Lock released when `file` drops at end of scope

    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;

    check_file_permissions(path);
    Ok(Some(migrate_config(data)))
}

/// Merges `overlay` into `base` in place: scalars and arrays in `overlay`
/// replace `base`'s value outright; nested objects are merged key-by-key
/// (recursively) rather than replaced wholesale, so e.g. a project layer
/// that only sets `hooks.BeforeTool` doesn't wipe out a user layer's
/// `tools.*` settings.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_val) => merge_json(base_val, overlay_val),
                    None => {
                        base_map.insert(key, overlay_val);
                    }
                }
            }
        }
        (base_slot, overlay_val) => {
            *base_slot = overlay_val;
        }
    }
}

/// Loads settings in increasing precedence — defaults → user settings
/// (`~/.oxicrab/config.json`, or `config_path` if given) → project settings
/// (`.oxicrab/config.json` under the current directory) — merging each
/// present layer key-by-key over the last, then validates the result once.
/// Credential resolution (env vars, credential helper, keyring) is a
/// separate, narrower precedence ladder applied after the merge — see
/// `credentials::apply_env_overrides` — since secrets should win over a
/// committed settings file regardless of which settings layer set them.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let user_path = config_path.unwrap_or(default_path.as_path());

    let mut merged = serde_json::to_value(Config::default())
        .with_context(|| "Failed to serialize default configuration")?;

    if let Some(user_layer) = read_layer(user_path)? {
        merge_json(&mut merged, user_layer);
    }
    if let Some(project_layer) = read_layer(&project_config_path())? {
        merge_json(&mut merged, project_layer);
    }

    let mut config: Config =
        serde_json::from_value(merged).with_context(|| "Failed to deserialize config")?;

    // Apply credential overrides (env > helper > keyring > settings layers)
    crate::config::credentials::apply_env_overrides(&mut config);
    crate::config::credentials::apply_credential_helper(&mut config);
    #[cfg(feature = "keyring-store")]
    crate::config::credentials::apply_keyring_overrides(&mut config);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    Ok(config)
}

/// Warn if the config file or its parent directory has overly permissive permissions.
/// Only emits warnings once per process to avoid spam when config is loaded multiple times.
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Once;

    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    "config file {} has permissions {:o} — recommend 0600",
                    path.display(),
                    mode & 0o777
                );
            }
        }

        if let Some(parent) = path.parent()
            && let Ok(meta) = std::fs::metadata(parent)
        {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    "config directory {} has permissions {:o} — recommend 0700",
                    parent.display(),
                    mode & 0o777
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {
    // Permission checks only apply on unix systems
}

fn migrate_config(data: Value) -> Value {
    // Move tools.exec.restrictToWorkspace → tools.restrictToWorkspace
    if let Value::Object(mut map) = data {
        if let Some(Value::Object(tools_map)) = map.get_mut("tools")
            && let Some(Value::Object(exec_map)) = tools_map.get_mut("exec")
            && let Some(restrict) = exec_map.remove("restrictToWorkspace")
            && !tools_map.contains_key("restrictToWorkspace")
        {
            tools_map.insert("restrictToWorkspace".to_string(), restrict);
        }
        Value::Object(map)
    } else {
        data
    }
}

pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    ensure_dir(path.parent().context("Config path has no parent")?)?;

    // Acquire exclusive lock via separate lockfile.
    // A separate file is needed because atomic_write() uses rename(), which
    // invalidates flock on the original inode. The .lock file survives renames.
    let lock_path = path.with_extension("json.lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to create lock file at {}", lock_path.display()))?;
    lock_file
        .lock_exclusive()
        .with_context(|| "Failed to acquire exclusive lock on config lock file")?;

    // serde `rename` attributes already produce camelCase keys during
    // serialization, so no post-processing is needed. A prior convert_to_camel
    // pass was removed because it corrupted HashMap keys (MCP server names,
    // env vars, custom headers, model cost prefixes) that contain underscores.
    let data = serde_json::to_value(config)?;

    let content = serde_json::to_string_pretty(&data)?;
    crate::utils::atomic_write(path, &content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    // Restrict permissions (best-effort, may fail on Windows)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    // Lock released when lock_file drops
    Ok(())
}

#[cfg(test)]
mod tests;
