use crate::cache::BundleStore;
use crate::domain::recommendation::{BundleKey, RecommendationBundle};
use crate::time::local_day::day_key;
use anyhow::Context;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

// Keeps `<name>.json.tmp-<uuid>` well under the 255-byte NAME_MAX of common filesystems.
const MAX_ESCAPED_LEN: usize = 120;
const LONG_PREFIX_LEN: usize = 60;

/// One JSON file per bundle under `<root>/<YYYYMMDD>/<identity>.json`.
///
/// Writes go to a temporary sibling and are renamed into place, so readers see either the old or
/// the new file, never a partial one.
#[derive(Debug, Clone)]
pub struct FileBundleStore {
    root: PathBuf,
}

impl FileBundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &BundleKey) -> PathBuf {
        self.root
            .join(day_key(key.day))
            .join(format!("{}.json", file_safe(&key.identity)))
    }
}

/// Identity tokens are opaque; anything outside `[A-Za-z0-9_-]` is hex-escaped so distinct tokens
/// never share a file. Escaped names longer than `MAX_ESCAPED_LEN` are cut to a prefix plus
/// `~<digest>`; `~` never appears in a plain escaped name.
fn file_safe(identity: &str) -> String {
    let escaped = escape(identity);
    if escaped.len() <= MAX_ESCAPED_LEN {
        return escaped;
    }
    // escaped text is ASCII, so any byte index is a char boundary
    format!("{}~{}", &escaped[..LONG_PREFIX_LEN], digest_hex(identity))
}

/// 128-bit hex digest from two salted Fx passes. Stable across processes, unlike `RandomState`.
fn digest_hex(identity: &str) -> String {
    let half = |salt: u64| {
        let mut hasher = rustc_hash::FxHasher::default();
        salt.hash(&mut hasher);
        identity.hash(&mut hasher);
        hasher.finish()
    };
    format!("{:016x}{:016x}", half(0x9E37_79B9_7F4A_7C15), half(0xC2B2_AE3D_27D4_EB4F))
}

fn escape(identity: &str) -> String {
    let mut out = String::with_capacity(identity.len());
    for b in identity.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    if out.is_empty() {
        out.push_str("%00");
    }
    out
}

#[async_trait::async_trait]
impl BundleStore for FileBundleStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, key: &BundleKey) -> anyhow::Result<Option<RecommendationBundle>> {
        let path = self.path_for(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let bundle = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse bundle {}", path.display()))?;
        Ok(Some(bundle))
    }

    async fn persist(&self, bundle: &RecommendationBundle) -> anyhow::Result<()> {
        let path = self.path_for(&bundle.key());
        let dir = path
            .parent()
            .context("bundle path has no parent directory")?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let text = serde_json::to_vec(bundle).context("bundle serialize failed")?;
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, text)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err).with_context(|| format!("failed to replace {}", path.display()));
        }
        Ok(())
    }
}
