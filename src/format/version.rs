use winnow::{binary::le_u16, PResult, Parser, Partial};

/// The "host system" half of a zip version field: which OS/filesystem wrote
/// (or is required to read) an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSystem {
    /// MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
    Msdos,
    /// Unix
    Unix,
    /// macOS (10.0+, since Mac OS X)
    Macintosh,
    /// A host system not recognized by this crate.
    Unrecognized(u8),
}

impl From<u8> for HostSystem {
    fn from(u: u8) -> Self {
        match u {
            0 => Self::Msdos,
            3 => Self::Unix,
            19 => Self::Macintosh,
            other => Self::Unrecognized(other),
        }
    }
}

impl From<HostSystem> for u8 {
    fn from(h: HostSystem) -> u8 {
        match h {
            HostSystem::Msdos => 0,
            HostSystem::Unix => 3,
            HostSystem::Macintosh => 19,
            HostSystem::Unrecognized(u) => u,
        }
    }
}

/// A zip version, e.g. "version made by" or "version needed to extract",
/// split into the host system byte and the numeric spec version (multiplied
/// by 10, e.g. `20` means "2.0").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Host system (upper byte).
    pub host_system: HostSystem,
    /// Zip spec version, as `major * 10 + minor` (lower byte).
    pub version: u8,
}

impl Version {
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        le_u16(i).map(Self::from)
    }

    pub fn to_u16(self) -> u16 {
        u16::from_le_bytes([self.version, self.host_system.into()])
    }

    /// Whether this entry requires zip64 support to extract correctly.
    pub fn needs_zip64(&self) -> bool {
        self.version >= 45
    }
}

impl From<u16> for Version {
    fn from(v: u16) -> Self {
        let [version, host_system] = v.to_le_bytes();
        Self { host_system: host_system.into(), version }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self { host_system: HostSystem::Unix, version: 20 }
    }
}
