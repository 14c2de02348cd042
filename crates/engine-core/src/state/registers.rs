//! Data-driven register files with composite register layouts.
//!
//! A device layout states each register's bit layout as data. Atomic
//! registers own storage; composite registers are pure compose/decompose
//! views over atomic ones, so `set(E0, v)` followed by `get(E0)` returns
//! `v` masked to the composite width, and sub-register writes are visible
//! through the composite read and vice versa.

use std::collections::BTreeMap;

/// One sub-field of a composite register: which atomic register supplies the
/// bits and where they land in the composed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubField {
    /// Atomic register id supplying the bits.
    pub source: u32,
    /// Left shift applied when composing.
    pub shift: u32,
    /// Field width in bits.
    pub width: u32,
}

/// Storage shape of one register id within a device layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// Backed by its own storage, masked to `width` bits on write.
    Atomic {
        /// Register width in bits.
        width: u32,
    },
    /// Derived from atomic registers through a fixed bit layout.
    Composite {
        /// Bit layout, most significant field first by convention.
        fields: &'static [SubField],
    },
}

/// A single register definition inside a device layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterSpec {
    /// Register id used by dispatch.
    pub id: u32,
    /// Storage shape.
    pub kind: RegisterKind,
}

/// Conventional id of the CPU device.
pub const CPU_DEVICE_ID: u32 = 0;
/// CPU working nibble register `A` (bits 11..8 of `E0`).
pub const REG_A: u32 = 0;
/// CPU working nibble register `B` (bits 7..4 of `E0`).
pub const REG_B: u32 = 1;
/// CPU working nibble register `C` (bits 3..0 of `E0`).
pub const REG_C: u32 = 2;
/// CPU composite register `E0 = A << 8 | B << 4 | C`.
pub const REG_E0: u32 = 3;
/// CPU 12-bit scratch register `E1`.
pub const REG_E1: u32 = 4;
/// CPU 12-bit scratch register `E2`.
pub const REG_E2: u32 = 5;

/// Register layout of the CPU device: three 4-bit working registers, their
/// 12-bit composite view `E0`, and two 12-bit scratch registers.
pub const CPU_REGISTER_LAYOUT: &[RegisterSpec] = &[
    RegisterSpec {
        id: REG_A,
        kind: RegisterKind::Atomic { width: 4 },
    },
    RegisterSpec {
        id: REG_B,
        kind: RegisterKind::Atomic { width: 4 },
    },
    RegisterSpec {
        id: REG_C,
        kind: RegisterKind::Atomic { width: 4 },
    },
    RegisterSpec {
        id: REG_E0,
        kind: RegisterKind::Composite {
            fields: &[
                SubField {
                    source: REG_A,
                    shift: 8,
                    width: 4,
                },
                SubField {
                    source: REG_B,
                    shift: 4,
                    width: 4,
                },
                SubField {
                    source: REG_C,
                    shift: 0,
                    width: 4,
                },
            ],
        },
    },
    RegisterSpec {
        id: REG_E1,
        kind: RegisterKind::Atomic { width: 12 },
    },
    RegisterSpec {
        id: REG_E2,
        kind: RegisterKind::Atomic { width: 12 },
    },
];

const fn width_mask(width: u32) -> u32 {
    if width >= u32::BITS {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Per-device register storage resolved through a static layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    layout: &'static [RegisterSpec],
    values: BTreeMap<u32, u32>,
}

impl RegisterFile {
    /// Builds a zeroed register file over `layout`.
    ///
    /// # Panics
    ///
    /// Panics when a composite field references an id that is not an atomic
    /// register of the same layout; layouts are compile-time data and such a
    /// reference is a programming error.
    #[must_use]
    pub fn new(layout: &'static [RegisterSpec]) -> Self {
        let values = layout
            .iter()
            .filter_map(|spec| match spec.kind {
                RegisterKind::Atomic { .. } => Some((spec.id, 0)),
                RegisterKind::Composite { .. } => None,
            })
            .collect();
        let file = Self { layout, values };
        for spec in layout {
            if let RegisterKind::Composite { fields } = spec.kind {
                for field in fields {
                    assert!(
                        file.atomic_width(field.source).is_some(),
                        "composite register {} references non-atomic source {}",
                        spec.id,
                        field.source
                    );
                }
            }
        }
        file
    }

    /// The layout this file was built over.
    #[must_use]
    pub const fn layout(&self) -> &'static [RegisterSpec] {
        self.layout
    }

    fn spec(&self, reg_id: u32) -> Option<&'static RegisterSpec> {
        self.layout.iter().find(|spec| spec.id == reg_id)
    }

    fn atomic_width(&self, reg_id: u32) -> Option<u32> {
        match self.spec(reg_id)?.kind {
            RegisterKind::Atomic { width } => Some(width),
            RegisterKind::Composite { .. } => None,
        }
    }

    /// Reads a register; composite reads compose from their fields.
    ///
    /// Returns `None` for an id the layout does not define.
    #[must_use]
    pub fn get(&self, reg_id: u32) -> Option<u32> {
        match self.spec(reg_id)?.kind {
            RegisterKind::Atomic { .. } => self.values.get(&reg_id).copied(),
            RegisterKind::Composite { fields } => Some(fields.iter().fold(0, |acc, field| {
                let bits = self.values.get(&field.source).copied().unwrap_or(0);
                acc | ((bits & width_mask(field.width)) << field.shift)
            })),
        }
    }

    /// Writes a register, masking to its width; composite writes decompose
    /// into their atomic fields.
    ///
    /// Returns `None` for an id the layout does not define.
    pub fn set(&mut self, reg_id: u32, value: u32) -> Option<()> {
        match self.spec(reg_id)?.kind {
            RegisterKind::Atomic { width } => {
                self.values.insert(reg_id, value & width_mask(width));
                Some(())
            }
            RegisterKind::Composite { fields } => {
                for field in fields {
                    self.values
                        .insert(field.source, (value >> field.shift) & width_mask(field.width));
                }
                Some(())
            }
        }
    }

    /// Writes an atomic register only. Used by the restore path, which must
    /// reject composite ids (snapshots carry atomic storage exclusively).
    pub fn set_atomic(&mut self, reg_id: u32, value: u32) -> Option<()> {
        let width = self.atomic_width(reg_id)?;
        self.values.insert(reg_id, value & width_mask(width));
        Some(())
    }

    /// Atomic registers in ascending id order, the snapshot ordering.
    pub fn atomic_entries(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.values.iter().map(|(id, value)| (*id, *value))
    }
}
