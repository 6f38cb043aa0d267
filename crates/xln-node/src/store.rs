use std::path::Path;

use anyhow::Context;

/// Persistent snapshot store backed by sled (pure-Rust, no C dependencies).
///
/// Trees:
///   snapshots — `snapshot:<height>` (utf8) → canonical tagged-JSON bytes
///   meta      — `latest_height`            → u64 big-endian
pub struct SnapshotStore {
    _db: sled::Db,
    snapshots: sled::Tree,
    meta: sled::Tree,
}

impl SnapshotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(path).context("opening snapshot database")?;
        let snapshots = db.open_tree("snapshots").context("opening snapshots tree")?;
        let meta = db.open_tree("meta").context("opening meta tree")?;
        Ok(Self { _db: db, snapshots, meta })
    }

    pub fn save(&self, height: u64, raw: &str) -> anyhow::Result<()> {
        let key = format!("snapshot:{height}");
        self.snapshots.insert(key.as_bytes(), raw.as_bytes())?;
        self.meta.insert("latest_height", &height.to_be_bytes())?;
        Ok(())
    }

    pub fn latest_height(&self) -> anyhow::Result<Option<u64>> {
        Ok(self.meta.get("latest_height")?.map(|bytes| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes);
            u64::from_be_bytes(buf)
        }))
    }

    pub fn load(&self, height: u64) -> anyhow::Result<Option<String>> {
        let key = format!("snapshot:{height}");
        Ok(self
            .snapshots
            .get(key.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn load_latest(&self) -> anyhow::Result<Option<(u64, String)>> {
        match self.latest_height()? {
            Some(height) => Ok(self.load(height)?.map(|raw| (height, raw))),
            None => Ok(None),
        }
    }

    /// Drop snapshots older than `keep` ticks behind the latest.
    pub fn prune(&self, keep: u64) -> anyhow::Result<()> {
        let Some(latest) = self.latest_height()? else { return Ok(()) };
        let cutoff = latest.saturating_sub(keep);
        for entry in self.snapshots.iter() {
            let (key, _) = entry?;
            let key_str = String::from_utf8_lossy(&key);
            if let Some(height) = key_str.strip_prefix("snapshot:").and_then(|h| h.parse::<u64>().ok())
            {
                if height < cutoff {
                    self.snapshots.remove(&key)?;
                }
            }
        }
        Ok(())
    }
}
