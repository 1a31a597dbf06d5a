//! Shared UI icons and emojis.
//!
//! Common emoji constants used across the UI components for consistent
//! visual styling, with plain-text fallbacks for dumb terminals.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Pipeline indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static WAITING: Emoji<'_, '_> = Emoji("⏸️  ", "[?]");
pub static PLUG: Emoji<'_, '_> = Emoji("🔌 ", "[~]");
pub static ARTICLE: Emoji<'_, '_> = Emoji("📄 ", "+");
