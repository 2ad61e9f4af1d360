//! Kernel build stage.

use anyhow::{Context, Result};

use crate::ccache::ToolchainCache;
use crate::kernel;
use crate::stage::BuildContext;

/// Progress of the kernel build, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    SourceFetched,
    Configured,
    Built,
}

impl State {
    fn advance(&mut self, next: State) {
        *self = next;
        println!("  [state] {:?}", next);
    }
}

/// Build the kernel and record its artifact set in the context.
pub fn run(ctx: &mut BuildContext) -> Result<()> {
    let config = &ctx.config;
    let mut state = State::NotStarted;

    // Cache init: fatal only when the user explicitly asked for caching.
    let cache: Option<ToolchainCache> = if !config.use_ccache {
        None
    } else if config.ccache_explicit {
        ToolchainCache::init(&config.work_dir, true)?
    } else {
        ToolchainCache::init_optional(&config.work_dir)
    };

    kernel::fetch_source(config)?;
    state.advance(State::SourceFetched);

    kernel::configure(config, &ctx.base_dir).context("Kernel configuration failed")?;
    state.advance(State::Configured);

    let stats_before = match &cache {
        Some(cache) => cache.stats().ok(),
        None => None,
    };

    kernel::build(config, cache.as_ref())?;
    state.advance(State::Built);

    if let (Some(cache), Some(before)) = (&cache, &stats_before) {
        if let Ok(after) = cache.stats() {
            cache.report(before, &after);
        }
    }

    // The release the build actually produced, not the version we asked
    // for. "6.18" in, "6.18.0-rc3-rock5b+" out is normal and the
    // produced string wins everywhere downstream.
    let release = kernel::kernel_release(config)?;
    if release != config.kernel_version {
        println!(
            "  Derived kernel release: {} (requested {})",
            release, config.kernel_version
        );
    } else {
        println!("  Derived kernel release: {}", release);
    }

    let modules_dir = kernel::install_modules(config)?;
    let artifacts = kernel::verify_artifacts(config, modules_dir, release)?;

    debug_assert_eq!(state, State::Built);
    ctx.kernel = Some(artifacts);
    Ok(())
}
