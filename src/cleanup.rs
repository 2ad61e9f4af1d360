//! Scoped acquisitions and the global unwind stack.
//!
//! Loop mounts, bind mounts and the binfmt shim copy are all acquired
//! through this module. Each acquisition pushes an undo action onto one
//! process-global stack; releases pop it. If anything goes wrong -- an
//! error bubbling out of a stage, a panic, or a SIGINT/SIGTERM -- the
//! stack is walked in strict reverse order, so a half-finished mount
//! chain never leaks mount points or loop devices.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::process::Cmd;

/// Undo action recorded for one acquisition.
pub type UndoFn = Box<dyn FnOnce() -> Result<()> + Send>;

struct Entry {
    id: u64,
    label: String,
    undo: UndoFn,
}

#[derive(Default)]
struct StackInner {
    entries: Vec<Entry>,
    next_id: u64,
    acquisitions: u64,
    releases: u64,
}

static STACK: OnceLock<Mutex<StackInner>> = OnceLock::new();

fn stack() -> &'static Mutex<StackInner> {
    STACK.get_or_init(|| Mutex::new(StackInner::default()))
}

/// Handle for one acquisition. Releasing out of LIFO order is a bug;
/// the RAII guards below make that hard to do by accident.
#[derive(Debug)]
pub struct Token {
    id: u64,
}

/// Record an acquisition with its undo action.
pub fn acquire(label: impl Into<String>, undo: UndoFn) -> Token {
    let mut inner = stack().lock().expect("cleanup stack poisoned");
    inner.next_id += 1;
    inner.acquisitions += 1;
    let id = inner.next_id;
    inner.entries.push(Entry {
        id,
        label: label.into(),
        undo,
    });
    Token { id }
}

/// Release one acquisition, running its undo action now.
///
/// A token whose entry was already drained by `unwind()` (panic path,
/// orchestrator cleanup) is a no-op: the undo already ran.
pub fn release(token: Token) -> Result<()> {
    let entry = {
        let mut inner = stack().lock().expect("cleanup stack poisoned");
        let Some(pos) = inner.entries.iter().position(|e| e.id == token.id) else {
            return Ok(());
        };
        inner.releases += 1;
        inner.entries.remove(pos)
    };
    (entry.undo)().with_context(|| format!("releasing '{}'", entry.label))
}

/// Unwind every outstanding acquisition in reverse order.
///
/// Undo failures are reported but do not stop the walk; later entries
/// (earlier acquisitions) still get their chance to release.
pub fn unwind() {
    loop {
        let entry = {
            let mut inner = stack().lock().expect("cleanup stack poisoned");
            let Some(entry) = inner.entries.pop() else {
                break;
            };
            inner.releases += 1;
            entry
        };
        println!("  Unwinding: {}", entry.label);
        if let Err(e) = (entry.undo)() {
            eprintln!("  [WARN] Unwind of '{}' failed: {:#}", entry.label, e);
        }
    }
}

/// (acquisitions, releases) since process start.
pub fn stats() -> (u64, u64) {
    let inner = stack().lock().expect("cleanup stack poisoned");
    (inner.acquisitions, inner.releases)
}

/// Number of acquisitions currently outstanding.
pub fn depth() -> usize {
    stack().lock().expect("cleanup stack poisoned").entries.len()
}

static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Install the unwind-on-panic handler. Called once at process start;
/// subsequent calls are no-ops.
pub fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let default = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default(info);
            eprintln!("Panic: unwinding outstanding mounts...");
            unwind();
        }));
    });
}

static SIGNAL_HOOK: OnceLock<()> = OnceLock::new();
static SIGNAL_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

// Runs in signal context, so the only thing it may do is the
// async-signal-safe write; the watcher thread does the real work.
extern "C" fn on_termination_signal(signum: libc::c_int) {
    let fd = SIGNAL_PIPE_WRITE.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = signum as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Install SIGINT/SIGTERM handling that unwinds outstanding mounts
/// before exiting.
///
/// Ctrl-C an hour into a build must not leave loop devices and bind
/// mounts behind. The handler itself only writes one byte to a pipe; a
/// watcher thread picks it up, runs `unwind()`, and exits with the
/// conventional 128+signum code. Idempotent like `install_panic_hook`.
pub fn install_signal_handlers() {
    SIGNAL_HOOK.get_or_init(|| {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            eprintln!("  [WARN] Could not set up signal handling; an interrupt will not unwind mounts");
            return;
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);
        SIGNAL_PIPE_WRITE.store(write_fd, Ordering::SeqCst);

        unsafe {
            libc::signal(libc::SIGINT, on_termination_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, on_termination_signal as libc::sighandler_t);
        }

        std::thread::spawn(move || {
            let mut byte = 0u8;
            let n = unsafe { libc::read(read_fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
            if n == 1 {
                eprintln!("\nInterrupted: unwinding outstanding mounts...");
                unwind();
                std::process::exit(128 + byte as i32);
            }
        });
    });
}

// =============================================================================
// RAII guards
// =============================================================================

/// A loopback-mounted filesystem image.
pub struct LoopMount {
    mountpoint: PathBuf,
    token: Option<Token>,
}

impl LoopMount {
    /// Mount `image` at `mountpoint` via a loop device.
    pub fn mount(image: &Path, mountpoint: &Path) -> Result<Self> {
        Self::mount_with_options(image, mountpoint, &[])
    }

    /// Mount with extra `-o` options (e.g. `ro` for the boot stage's
    /// read-only look at the finished rootfs).
    pub fn mount_with_options(image: &Path, mountpoint: &Path, extra: &[&str]) -> Result<Self> {
        fs::create_dir_all(mountpoint)
            .with_context(|| format!("Creating mount point {}", mountpoint.display()))?;

        let mut options = String::from("loop");
        for opt in extra {
            options.push(',');
            options.push_str(opt);
        }

        Cmd::new("mount")
            .args(["-o", &options])
            .arg_path(image)
            .arg_path(mountpoint)
            .error_msg(format!("Failed to loop-mount {}", image.display()))
            .run()?;

        let undo_point = mountpoint.to_path_buf();
        let token = acquire(
            format!("loop mount {}", mountpoint.display()),
            Box::new(move || {
                Cmd::new("umount")
                    .arg_path(&undo_point)
                    .error_msg(format!("Failed to unmount {}", undo_point.display()))
                    .run()?;
                Ok(())
            }),
        );

        Ok(Self {
            mountpoint: mountpoint.to_path_buf(),
            token: Some(token),
        })
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmount now. Consumes the guard.
    pub fn release(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => release(token),
            None => Ok(()),
        }
    }
}

impl Drop for LoopMount {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = release(token) {
                eprintln!("  [WARN] {:#}", e);
            }
        }
    }
}

/// A bind mount of a host directory into the target rootfs.
pub struct BindMount {
    target: PathBuf,
    token: Option<Token>,
}

impl BindMount {
    /// Bind `source` (a host directory like /dev or /proc) at `target`.
    pub fn bind(source: &Path, target: &Path) -> Result<Self> {
        fs::create_dir_all(target)
            .with_context(|| format!("Creating bind target {}", target.display()))?;

        Cmd::new("mount")
            .arg("--bind")
            .arg_path(source)
            .arg_path(target)
            .error_msg(format!(
                "Failed to bind-mount {} at {}",
                source.display(),
                target.display()
            ))
            .run()?;

        let undo_target = target.to_path_buf();
        let token = acquire(
            format!("bind mount {}", target.display()),
            Box::new(move || {
                // Lazy unmount as fallback keeps the unwind moving if the
                // chroot left a process holding the mount busy.
                let direct = Cmd::new("umount").arg_path(&undo_target).allow_fail().run()?;
                if !direct.success() {
                    Cmd::new("umount")
                        .arg("-l")
                        .arg_path(&undo_target)
                        .error_msg(format!("Failed to unmount {}", undo_target.display()))
                        .run()?;
                }
                Ok(())
            }),
        );

        Ok(Self {
            target: target.to_path_buf(),
            token: Some(token),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Unmount now. Consumes the guard.
    pub fn release(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => release(token),
            None => Ok(()),
        }
    }
}

impl Drop for BindMount {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = release(token) {
                eprintln!("  [WARN] {:#}", e);
            }
        }
    }
}

/// The foreign-binary execution shim: qemu-user-static copied into the
/// target rootfs so arm64 package scripts can run on a non-arm64 host.
///
/// The host's binfmt_misc registration (from the qemu-user-static package)
/// resolves the interpreter inside the chroot, so the copy is the whole
/// registration from this pipeline's point of view.
pub struct BinfmtShim {
    token: Option<Token>,
}

/// Interpreter binary the target architecture needs on a foreign host.
pub const QEMU_STATIC: &str = "qemu-aarch64-static";

impl BinfmtShim {
    /// Returns true when the host cannot execute target binaries natively.
    pub fn needed() -> bool {
        std::env::consts::ARCH != "aarch64"
    }

    /// Copy the shim into `rootfs` if the host architecture requires it.
    /// Returns `None` on a native arm64 host.
    pub fn register(rootfs: &Path) -> Result<Option<Self>> {
        if !Self::needed() {
            return Ok(None);
        }

        let host_shim = which::which(QEMU_STATIC).with_context(|| {
            format!(
                "{} not found on host. Install qemu-user-static for cross-architecture installs.",
                QEMU_STATIC
            )
        })?;

        let dest = rootfs.join("usr/bin").join(QEMU_STATIC);
        fs::create_dir_all(rootfs.join("usr/bin"))?;
        fs::copy(&host_shim, &dest)
            .with_context(|| format!("Copying {} into rootfs", QEMU_STATIC))?;

        let undo_dest = dest.clone();
        let token = acquire(
            format!("binfmt shim {}", dest.display()),
            Box::new(move || {
                fs::remove_file(&undo_dest)
                    .with_context(|| format!("Removing {}", undo_dest.display()))?;
                Ok(())
            }),
        );

        println!("  Registered {} in target rootfs", QEMU_STATIC);
        Ok(Some(Self { token: Some(token) }))
    }

    /// Remove the shim now. Consumes the guard.
    pub fn deregister(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => release(token),
            None => Ok(()),
        }
    }
}

impl Drop for BinfmtShim {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = release(token) {
                eprintln!("  [WARN] {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // The stack is process-global, so anything touching it runs serially.

    #[test]
    #[serial_test::serial(cleanup_stack)]
    fn test_release_runs_undo_once() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let token = acquire(
            "test entry",
            Box::new(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        release(token).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial_test::serial(cleanup_stack)]
    fn test_unwind_is_lifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            acquire(
                format!("lifo entry {}", i),
                Box::new(move || {
                    order.lock().unwrap().push(i);
                    Ok(())
                }),
            );
        }
        unwind();
        let seen = order.lock().unwrap();
        // Entries this test pushed come back newest-first.
        let ours: Vec<_> = seen.iter().copied().collect();
        assert_eq!(ours, vec![2, 1, 0]);
    }

    #[test]
    #[serial_test::serial(cleanup_stack)]
    fn test_signal_handler_install_is_idempotent() {
        // Repeated installs must not re-register or spawn extra
        // watchers; the stack stays balanced either way.
        install_signal_handlers();
        install_signal_handlers();
        let (acquisitions, releases) = stats();
        assert_eq!(acquisitions, releases);
    }

    #[test]
    #[serial_test::serial(cleanup_stack)]
    fn test_balance_after_unwind() {
        acquire("balance probe", Box::new(|| Ok(())));
        unwind();
        let (acquisitions, releases) = stats();
        assert_eq!(acquisitions, releases);
        assert_eq!(depth(), 0);
    }
}
