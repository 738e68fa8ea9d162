/// Disk space introspection
///
/// Backup runs check the target filesystem for a configured minimum of
/// free space before invoking the engine tools.

use anyhow::Result;
use std::path::Path;
use sysinfo::Disks;

/// Available bytes on the filesystem holding `path`, chosen as the disk
/// with the longest mount-point prefix. None when the mount table gives
/// no match (common in minimal containers); callers degrade to a warning.
pub fn available_space(path: &Path) -> Result<Option<u64>> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    let disks = Disks::new_with_refreshed_list();

    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let depth = mount.components().count();
            if best.map(|(d, _)| depth > d).unwrap_or(true) {
                best = Some((depth, disk.available_space()));
            }
        }
    }

    Ok(best.map(|(_, space)| space))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_space_for_root() {
        // Mount tables vary across environments; just exercise the lookup
        let space = available_space(Path::new("/")).unwrap();
        if let Some(bytes) = space {
            assert!(bytes > 0);
        }
    }
}
