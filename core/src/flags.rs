//! Flag instance allocation.
//!
//! Each flag category (status, MAC, clip) has four physical instances.
//! Writers take instances round-robin; a write becomes visible
//! [`FLAG_LATENCY`] cycles after issue, and readers see the newest
//! instance whose commit cycle has been reached.

/// Physical instances per flag category.
pub const FLAG_INSTANCES: u8 = 4;
/// Cycles between a flag write issuing and readers observing it.
pub const FLAG_LATENCY: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagKind {
    Status = 0,
    Mac = 1,
    Clip = 2,
}

impl FlagKind {
    pub const ALL: [FlagKind; 3] = [FlagKind::Status, FlagKind::Mac, FlagKind::Clip];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            FlagKind::Status => "status",
            FlagKind::Mac => "mac",
            FlagKind::Clip => "clip",
        }
    }
}

/// Set of flag categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FlagSet(u8);

impl FlagSet {
    pub const EMPTY: Self = Self(0);
    pub const STATUS: Self = Self(1 << FlagKind::Status as u8);
    pub const MAC: Self = Self(1 << FlagKind::Mac as u8);
    pub const CLIP: Self = Self(1 << FlagKind::Clip as u8);
    pub const STATUS_MAC: Self = Self(Self::STATUS.0 | Self::MAC.0);

    pub const fn contains(self, kind: FlagKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Instance bookkeeping of one flag category for a single micro-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MicroFlagInst {
    /// The upper op writes this category.
    pub do_flag: bool,
    /// Instance written (or the one the next write would take).
    pub write: u8,
    /// Newest allocated instance once this op has issued.
    pub last_write: u8,
    /// Instance a read in this cycle observes.
    pub read: u8,
}

impl MicroFlagInst {
    /// Instance preceding `write`, source of sticky and history bits.
    pub const fn prev_write(&self) -> u8 {
        (self.write + FLAG_INSTANCES - 1) % FLAG_INSTANCES
    }
}

/// Commit timeline of one flag category across a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagCycles {
    commit: [Option<u32>; FLAG_INSTANCES as usize],
    last_write: u8,
}

impl FlagCycles {
    /// Timeline whose only committed value is the entry instance.
    pub fn new(entry_instance: u8) -> Self {
        let entry = entry_instance % FLAG_INSTANCES;
        let mut commit = [None; FLAG_INSTANCES as usize];
        commit[entry as usize] = Some(0);
        Self {
            commit,
            last_write: entry,
        }
    }

    pub fn last_write(&self) -> u8 {
        self.last_write
    }

    /// Newest instance whose write has committed by `cycle`.
    pub fn find_read(&self, cycle: u32) -> u8 {
        let mut best: Option<(u32, u8)> = None;
        for (inst, c) in self.commit.iter().enumerate() {
            if let Some(c) = *c {
                if c <= cycle && best.map_or(true, |(bc, _)| c > bc) {
                    best = Some((c, inst as u8));
                }
            }
        }
        best.map_or(self.last_write, |(_, inst)| inst)
    }

    /// Take the next instance for a write issued at `cycle`.
    pub fn allocate(&mut self, cycle: u32) -> u8 {
        let inst = (self.last_write + 1) % FLAG_INSTANCES;
        self.commit[inst as usize] = Some(cycle + FLAG_LATENCY);
        self.last_write = inst;
        inst
    }

    /// Resolve read and write instances for an op issuing at `cycle`.
    /// The read is resolved before this op's own write is allocated.
    pub fn resolve(&mut self, cycle: u32, writes: bool) -> MicroFlagInst {
        let read = self.find_read(cycle);
        let write = if writes {
            self.allocate(cycle)
        } else {
            (self.last_write + 1) % FLAG_INSTANCES
        };
        MicroFlagInst {
            do_flag: writes,
            write,
            last_write: self.last_write,
            read,
        }
    }
}

/// Pack per-category instance indices into the state's flag byte.
pub const fn pack_instances(status: u8, mac: u8, clip: u8) -> u8 {
    (status & 3) | ((mac & 3) << 2) | ((clip & 3) << 4)
}

/// Instance index of `kind` within a packed flag byte.
pub const fn unpack_instance(flags: u8, kind: FlagKind) -> u8 {
    (flags >> (2 * kind as u8)) & 3
}
