//! Pick the launcher variant for a platform tag.

use std::sync::Arc;

use crate::{
    AndroidLauncher, DedicatedServerLauncher, EditorLauncher, GameLauncher, GenericLauncher, Launcher,
    LauncherConfig, LauncherKind, ResourceLocator,
};

/// Build the launcher selected by `config.platform`.
pub fn create_launcher(locator: Arc<ResourceLocator>, config: LauncherConfig) -> Box<dyn Launcher> {
    tracing::debug!("creating {} launcher", config.platform);
    match config.platform.kind() {
        LauncherKind::Editor => Box::new(EditorLauncher::new(locator, config)),
        LauncherKind::Game => Box::new(GameLauncher::new(locator, config)),
        LauncherKind::DedicatedServer => Box::new(DedicatedServerLauncher::new(locator, config)),
        LauncherKind::Generic => Box::new(GenericLauncher::new(locator, config)),
        LauncherKind::Android => Box::new(AndroidLauncher::new(locator, config)),
    }
}
