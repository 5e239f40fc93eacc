use meristem_domain::{SduiFallback, SduiVersion};
use serde::Serialize;

/// Outcome of SDUI version negotiation between the core and a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SduiCompat {
    pub compatible: bool,
    /// The version the UI renders with when compatible.
    pub negotiated: Option<SduiVersion>,
    /// UI behavior when incompatible.
    pub fallback: Option<SduiFallback>,
}

/// Negotiate `core` against `plugin`:
/// - major mismatch ⇒ incompatible, fallback HIDE
/// - core minor < plugin minor ⇒ incompatible, fallback BASIC_FALLBACK
/// - otherwise compatible; negotiated = plugin's version
pub fn negotiate_sdui(core: SduiVersion, plugin: SduiVersion) -> SduiCompat {
    if core.major != plugin.major {
        return SduiCompat { compatible: false, negotiated: None, fallback: Some(SduiFallback::Hide) };
    }
    if core.minor < plugin.minor {
        return SduiCompat {
            compatible: false,
            negotiated: None,
            fallback: Some(SduiFallback::BasicFallback),
        };
    }
    SduiCompat { compatible: true, negotiated: Some(plugin), fallback: None }
}
