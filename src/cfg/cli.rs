// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};

/// Resolves a profile path relative to the current working directory and
/// canonicalizes it.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}

/// Resolves a `file://` URL target against the configured data directory.
///
/// The resulting path must stay inside `data_dir`; anything that escapes it
/// (absolute components, `..` traversal) is rejected.
pub fn resolve_file_url(data_dir: &Path, url: &str) -> Result<PathBuf> {
    let rest = url
        .strip_prefix("file://")
        .with_context(|| format!("unsupported url scheme: {url}"))?;
    let rel = rest.trim_start_matches('/');
    ensure!(!rel.is_empty(), "empty file url: {url}");

    let mut out = data_dir.to_path_buf();
    for comp in Path::new(rel).components() {
        match comp {
            std::path::Component::Normal(c) => out.push(c),
            _ => bail!("file url escapes the data directory: {url}"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_url_stays_inside_data_dir() {
        let dir = Path::new("/var/lib/netconfd");
        let p = resolve_file_url(dir, "file://backup/startup.xml").expect("resolve");
        assert_eq!(p, Path::new("/var/lib/netconfd/backup/startup.xml"));
    }

    #[test]
    fn file_url_traversal_is_rejected() {
        let dir = Path::new("/var/lib/netconfd");
        assert!(resolve_file_url(dir, "file://../etc/passwd").is_err());
        assert!(resolve_file_url(dir, "http://host/x").is_err());
    }
}
