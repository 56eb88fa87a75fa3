//! Compilation targets and build-time availability.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

/// Target architecture family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Reference CPU kernels.
    Host,
    /// Tiled, rayon-parallel kernels from `tc-accel`.
    Accel,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Host => f.write_str("host"),
            Arch::Accel => f.write_str("accel"),
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "host" | "cpu" => Ok(Arch::Host),
            "accel" => Ok(Arch::Accel),
            other => Err(format!("unknown target {other:?} (expected host or accel)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub arch: Arch,
}

impl Target {
    pub fn host() -> Self {
        Self { arch: Arch::Host }
    }

    pub fn accel() -> Self {
        Self { arch: Arch::Accel }
    }

    /// Whether this build can execute programs for the target.
    pub fn is_available(&self) -> bool {
        match self.arch {
            Arch::Host => true,
            Arch::Accel => is_compiled_with_accel(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.arch.fmt(f)
    }
}

/// True when the `accel` feature (and with it `tc-accel`) is compiled in.
pub fn is_compiled_with_accel() -> bool {
    cfg!(feature = "accel")
}

/// Pick the target via env var → compile-time feature → host fallback.
///
/// Priority:
/// 1. `TC_TARGET` env var (`"host"` or `"accel"`, case-insensitive)
/// 2. `Accel` when compiled with the `accel` feature
/// 3. `Host`
pub fn default_target() -> Target {
    target_from_lookup(|key| std::env::var(key).ok())
}

/// [`default_target`] over an arbitrary variable source.
pub fn target_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Target {
    if let Some(val) = lookup("TC_TARGET") {
        match val.parse::<Arch>() {
            Ok(arch) => return Target { arch },
            Err(msg) => warn!(%msg, "ignoring TC_TARGET"),
        }
    }

    if is_compiled_with_accel() {
        Target::accel()
    } else {
        Target::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_parse() {
        assert_eq!("HOST".parse::<Arch>(), Ok(Arch::Host));
        assert_eq!(" accel ".parse::<Arch>(), Ok(Arch::Accel));
        assert!("cuda".parse::<Arch>().is_err());
    }

    #[test]
    fn test_host_always_available() {
        assert!(Target::host().is_available());
        assert_eq!(Target::accel().is_available(), is_compiled_with_accel());
    }

    fn env(v: &'static str) -> impl Fn(&str) -> Option<String> {
        move |k: &str| (k == "TC_TARGET").then(|| v.to_string())
    }

    #[test]
    fn test_target_from_lookup() {
        assert_eq!(target_from_lookup(env("host")), Target::host());
        assert_eq!(target_from_lookup(env("CPU")), Target::host());
        assert_eq!(target_from_lookup(env("accel")), Target::accel());
        let fallback = if is_compiled_with_accel() {
            Target::accel()
        } else {
            Target::host()
        };
        // unknown values are ignored rather than failing the build
        assert_eq!(target_from_lookup(env("tpu")), fallback);
        assert_eq!(target_from_lookup(|_| None), fallback);
    }

    #[test]
    fn test_display() {
        assert_eq!(Target::accel().to_string(), "accel");
    }
}
