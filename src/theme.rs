//! Light/dark theme resolution.
//!
//! The user picks `light`, `dark` or `system`. Under `system` the effective
//! theme follows [`SystemColorScheme`], which the binary seeds from the
//! terminal and tests drive directly. [`ThemeController::watch_system`]
//! keeps the applied value current while the signal changes.

use std::sync::Arc;

use anyhow::Result;
use crossterm::style::Color;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::Sentiment;
use crate::preferences::{PersistentPreference, PreferenceValue};
use crate::storage::Database;

/// Preference key holding the chosen theme.
pub const THEME_KEY: &str = "theme";

// ============================================================================
// Theme Preference
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemePreference {
    Light,
    Dark,
    #[default]
    System,
}

impl ThemePreference {
    /// Parse a preference name (case-insensitive).
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }

    /// Whether this preference resolves to dark given the system signal.
    pub fn resolve(self, system_dark: bool) -> bool {
        match self {
            Self::Light => false,
            Self::Dark => true,
            Self::System => system_dark,
        }
    }
}

impl PreferenceValue for ThemePreference {
    fn encode(&self) -> String {
        self.name().to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        Self::from_str_name(raw)
    }
}

// ============================================================================
// System Color Scheme
// ============================================================================

/// The operating environment's light/dark signal.
#[derive(Debug, Clone)]
pub struct SystemColorScheme {
    tx: Arc<watch::Sender<bool>>,
}

impl SystemColorScheme {
    pub fn new(dark: bool) -> Self {
        let (tx, _) = watch::channel(dark);
        Self { tx: Arc::new(tx) }
    }

    /// Read the terminal's background from `COLORFGBG`, assuming dark when
    /// the variable is absent or unreadable.
    pub fn detect() -> Self {
        let value = std::env::var("COLORFGBG").ok();
        let dark = dark_from_colorfgbg(value.as_deref()).unwrap_or(true);
        tracing::debug!(dark, "Detected terminal color scheme");
        Self::new(dark)
    }

    pub fn is_dark(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_dark(&self, dark: bool) {
        self.tx.send_replace(dark);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// `COLORFGBG` is `fg;bg` (sometimes `fg;x;bg`); backgrounds 0-6 and 8 are
/// the dark half of the 16-color table.
fn dark_from_colorfgbg(value: Option<&str>) -> Option<bool> {
    let bg: u8 = value?.rsplit(';').next()?.trim().parse().ok()?;
    Some(matches!(bg, 0..=6 | 8))
}

// ============================================================================
// Theme Controller
// ============================================================================

/// Resolves and applies the effective theme.
///
/// Clones share the stored preference and the applied channel.
#[derive(Debug, Clone)]
pub struct ThemeController {
    preference: PersistentPreference<ThemePreference>,
    system: SystemColorScheme,
    applied: Arc<watch::Sender<bool>>,
}

impl ThemeController {
    pub async fn load(db: &Database, system: SystemColorScheme) -> Result<Self> {
        let preference: PersistentPreference<ThemePreference> =
            PersistentPreference::load(db, THEME_KEY).await?;
        let initial = preference
            .get()
            .unwrap_or_default()
            .resolve(system.is_dark());
        let (applied, _) = watch::channel(initial);
        Ok(Self {
            preference,
            system,
            applied: Arc::new(applied),
        })
    }

    pub fn preference(&self) -> ThemePreference {
        self.preference.get().unwrap_or_default()
    }

    /// Persist `preference` and apply it.
    pub async fn set_preference(&self, preference: ThemePreference) -> Result<()> {
        self.preference.set(preference).await?;
        tracing::info!(theme = preference.name(), "Theme preference changed");
        self.reapply();
        Ok(())
    }

    pub fn is_effectively_dark(&self) -> bool {
        self.preference().resolve(self.system.is_dark())
    }

    /// Switch to the concrete opposite of what is showing now.
    ///
    /// Under `system` this pins the theme; toggling never returns to `system`.
    pub async fn toggle(&self) -> Result<ThemePreference> {
        let next = if self.is_effectively_dark() {
            ThemePreference::Light
        } else {
            ThemePreference::Dark
        };
        self.set_preference(next).await?;
        Ok(next)
    }

    /// The applied theme (`true` = dark), updated on every change.
    pub fn applied(&self) -> watch::Receiver<bool> {
        self.applied.subscribe()
    }

    pub fn palette(&self) -> Palette {
        Palette::for_dark(self.is_effectively_dark())
    }

    /// Follow system signal changes until the returned guard is dropped.
    pub fn watch_system(&self) -> SystemThemeWatch {
        let mut rx = self.system.subscribe();
        let controller = self.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                controller.reapply();
            }
        });
        SystemThemeWatch { task }
    }

    fn reapply(&self) {
        let dark = self.is_effectively_dark();
        self.applied.send_if_modified(|current| {
            if *current == dark {
                return false;
            }
            *current = dark;
            tracing::debug!(dark, "Applied theme changed");
            true
        });
    }
}

/// Live system-theme subscription. Dropping it stops the listener.
#[derive(Debug)]
pub struct SystemThemeWatch {
    task: JoinHandle<()>,
}

impl Drop for SystemThemeWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Palette
// ============================================================================

/// Terminal colors for the effective theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub heading: Color,
    pub body: Color,
    pub muted: Color,
    pub accent: Color,
    pub error: Color,
    pub positive: Color,
    pub neutral: Color,
    pub negative: Color,
}

impl Palette {
    pub fn for_dark(dark: bool) -> Self {
        if dark {
            Self::dark()
        } else {
            Self::light()
        }
    }

    fn dark() -> Self {
        Self {
            heading: Color::Cyan,
            body: Color::Reset,
            muted: Color::DarkGrey,
            accent: Color::Yellow,
            error: Color::Red,
            positive: Color::Green,
            neutral: Color::Grey,
            negative: Color::Red,
        }
    }

    fn light() -> Self {
        Self {
            heading: Color::Blue,
            body: Color::Black,
            muted: Color::DarkGrey,
            accent: Color::Magenta,
            error: Color::DarkRed,
            positive: Color::DarkGreen,
            neutral: Color::DarkGrey,
            negative: Color::DarkRed,
        }
    }

    pub fn sentiment(&self, sentiment: Sentiment) -> Color {
        match sentiment {
            Sentiment::Positive => self.positive,
            Sentiment::Neutral => self.neutral,
            Sentiment::Negative => self.negative,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn controller(system_dark: bool) -> (Database, SystemColorScheme, ThemeController) {
        let db = Database::open(":memory:").await.unwrap();
        let system = SystemColorScheme::new(system_dark);
        let theme = ThemeController::load(&db, system.clone()).await.unwrap();
        (db, system, theme)
    }

    #[tokio::test]
    async fn test_defaults_to_system() {
        let (_db, _system, theme) = controller(true).await;
        assert_eq!(theme.preference(), ThemePreference::System);
        assert!(theme.is_effectively_dark());
    }

    #[tokio::test]
    async fn test_toggle_from_system_dark_pins_light() {
        let (_db, _system, theme) = controller(true).await;
        let next = theme.toggle().await.unwrap();
        assert_eq!(next, ThemePreference::Light);
        assert_eq!(theme.preference(), ThemePreference::Light);
        assert!(!theme.is_effectively_dark());
    }

    #[tokio::test]
    async fn test_toggle_from_system_light_pins_dark() {
        let (_db, _system, theme) = controller(false).await;
        assert_eq!(theme.toggle().await.unwrap(), ThemePreference::Dark);
        assert_eq!(theme.toggle().await.unwrap(), ThemePreference::Light);
    }

    #[tokio::test]
    async fn test_preference_persists() {
        let (db, system, theme) = controller(true).await;
        theme.set_preference(ThemePreference::Light).await.unwrap();

        let reloaded = ThemeController::load(&db, system).await.unwrap();
        assert_eq!(reloaded.preference(), ThemePreference::Light);
    }

    #[tokio::test]
    async fn test_explicit_preference_ignores_system() {
        let (_db, system, theme) = controller(true).await;
        theme.set_preference(ThemePreference::Dark).await.unwrap();
        system.set_dark(false);
        assert!(theme.is_effectively_dark());
    }

    #[tokio::test]
    async fn test_set_preference_updates_applied() {
        let (_db, _system, theme) = controller(true).await;
        let applied = theme.applied();
        theme.set_preference(ThemePreference::Light).await.unwrap();
        assert!(!*applied.borrow());
    }

    #[tokio::test]
    async fn test_watch_follows_system_changes() {
        let (_db, system, theme) = controller(true).await;
        let mut applied = theme.applied();
        let _watch = theme.watch_system();

        system.set_dark(false);
        tokio::time::timeout(Duration::from_secs(1), applied.changed())
            .await
            .expect("applied theme should change")
            .unwrap();
        assert!(!*applied.borrow());
    }

    #[tokio::test]
    async fn test_dropped_watch_stops_following() {
        let (_db, system, theme) = controller(true).await;
        let applied = theme.applied();
        let watch = theme.watch_system();
        drop(watch);

        system.set_dark(false);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(*applied.borrow());
    }

    #[test]
    fn test_colorfgbg_parsing() {
        assert_eq!(dark_from_colorfgbg(Some("15;0")), Some(true));
        assert_eq!(dark_from_colorfgbg(Some("0;15")), Some(false));
        assert_eq!(dark_from_colorfgbg(Some("12;default;8")), Some(true));
        assert_eq!(dark_from_colorfgbg(Some("0;7")), Some(false));
        assert_eq!(dark_from_colorfgbg(Some("garbage")), None);
        assert_eq!(dark_from_colorfgbg(None), None);
    }

    #[test]
    fn test_preference_names_round_trip() {
        for pref in [
            ThemePreference::Light,
            ThemePreference::Dark,
            ThemePreference::System,
        ] {
            assert_eq!(ThemePreference::decode(&pref.encode()), Some(pref));
        }
        assert_eq!(ThemePreference::from_str_name("DARK"), Some(ThemePreference::Dark));
        assert_eq!(ThemePreference::from_str_name("sepia"), None);
    }

    #[test]
    fn test_palettes_differ() {
        let dark = Palette::for_dark(true);
        let light = Palette::for_dark(false);
        assert_ne!(dark, light);
        assert_eq!(dark.sentiment(Sentiment::Positive), Color::Green);
    }
}
