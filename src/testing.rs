//! Helpers shared by the unit tests of several modules.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Writes an executable shell script standing in for `git`.
///
/// The script is executed once in probe mode before returning, so no open
/// write handle can make a later spawn fail with "text file busy".
pub fn fake_git(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-git");
    let script = format!(
        "#!/bin/sh\nif [ -n \"$FAKE_GIT_PROBE\" ]; then exit 0; fi\n{}\n",
        body
    );
    std::fs::write(&path, script).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();

    for _ in 0..100 {
        match std::process::Command::new(&path)
            .env("FAKE_GIT_PROBE", "1")
            .status()
        {
            Ok(_) => return path,
            Err(e) if e.raw_os_error() == Some(26) => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("fake git script not runnable: {}", e),
        }
    }
    panic!("fake git script stayed busy");
}

/// True when a real `git` binary is on the PATH.
pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

/// True when `ssh-keygen` can be run to create throwaway keys.
pub fn ssh_keygen_available() -> bool {
    std::process::Command::new("ssh-keygen")
        .arg("-?")
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}

/// True when an OpenSSH client is on the PATH.
pub fn openssh_client_available() -> bool {
    std::process::Command::new("ssh")
        .arg("-V")
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Creates an unencrypted ed25519 key pair at `dir/name` and `dir/name.pub`.
pub fn generate_ed25519_key(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let status = std::process::Command::new("ssh-keygen")
        .args(["-t", "ed25519", "-N", "", "-q", "-C", name, "-f"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success(), "ssh-keygen failed for {}", name);
    path
}

/// Last counter a fake git script wrote to `path`, or 0 before the first write.
pub fn read_counter(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse().ok())
        .unwrap_or(0)
}
