//! Typed MMIO register access.
//!
//! A [`RegisterWindow`] is the handle a driver receives when its physical
//! register range is mapped. It is created once at probe time and never
//! remapped; drivers wrap it in a block declared with `register_block!`,
//! which validates the window size once and then exposes one safe accessor
//! per register. No driver performs pointer arithmetic of its own.
//!
//! All accesses funnel through a [`RegisterBus`]: [`MmioBus`] for real
//! device memory, [`sim::SimBus`] for the simulated SoC used by tests.

pub mod sim;

use alloc::sync::Arc;
use core::{fmt, ptr};

use crate::{
    arch::barriers::data_sync_barrier,
    error::{KernelError, KernelResult},
};

/// Width of every register on the simulated SoC.
pub const REG_WIDTH: usize = 4;

// ---------------------------------------------------------------------------
// Bus abstraction
// ---------------------------------------------------------------------------

/// Backend that carries 32-bit register accesses to the device.
pub trait RegisterBus: Send + Sync {
    /// Read the 32-bit register at absolute address `addr`.
    fn read32(&self, addr: usize) -> u32;

    /// Write the 32-bit register at absolute address `addr`.
    fn write32(&self, addr: usize, value: u32);

    /// Order all previous accesses before any later one.
    fn barrier(&self) {
        data_sync_barrier();
    }
}

/// Volatile access to memory-mapped device registers.
pub struct MmioBus {
    _private: (),
}

impl MmioBus {
    /// Create the bus for real device memory.
    ///
    /// # Safety
    ///
    /// Every [`RegisterWindow`] built on top of the returned bus must
    /// describe a region that is mapped as device memory for the rest of
    /// the program.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterBus for MmioBus {
    #[inline]
    fn read32(&self, addr: usize) -> u32 {
        // SAFETY: `MmioBus::new` obliges its caller to only build windows
        // over mapped device memory, and `RegisterWindow` keeps every access
        // inside its window. Volatile keeps the access from being elided.
        unsafe { ptr::read_volatile(addr as *const u32) }
    }

    #[inline]
    fn write32(&self, addr: usize, value: u32) {
        // SAFETY: see `read32`; the address lies inside a mapped device
        // window. Volatile makes sure the write reaches the device.
        unsafe { ptr::write_volatile(addr as *mut u32, value) }
    }
}

/// Black-box resolution of a physical register range into a window.
///
/// Implemented by the platform I/O table; fails with
/// [`KernelError::MapError`] when the range cannot be resolved.
pub trait MmioMapper {
    fn iomap(&self, phys: usize, size: usize) -> KernelResult<RegisterWindow>;
}

// ---------------------------------------------------------------------------
// Register window
// ---------------------------------------------------------------------------

/// Mapped register region owned by one driver.
#[derive(Clone)]
pub struct RegisterWindow {
    base: usize,
    size: usize,
    bus: Arc<dyn RegisterBus>,
}

impl RegisterWindow {
    pub fn new(base: usize, size: usize, bus: Arc<dyn RegisterBus>) -> Self {
        Self { base, size, bus }
    }

    /// Virtual base address of the window.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Length of the window in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the first `len` bytes of the window are addressable.
    pub fn covers(&self, len: usize) -> bool {
        len <= self.size
    }

    /// Whether a whole register at `offset` lies inside the window.
    fn fits(&self, offset: usize) -> bool {
        offset
            .checked_add(REG_WIDTH)
            .is_some_and(|end| end <= self.size)
    }

    /// Read a register by offset, with a bounds check.
    pub fn read32(&self, offset: usize) -> KernelResult<u32> {
        self.check(offset)?;
        Ok(self.read_reg(offset))
    }

    /// Write a register by offset, with a bounds check.
    pub fn write32(&self, offset: usize, value: u32) -> KernelResult<()> {
        self.check(offset)?;
        self.write_reg(offset, value);
        Ok(())
    }

    /// Issue the bus barrier.
    pub fn barrier(&self) {
        self.bus.barrier();
    }

    fn check(&self, offset: usize) -> KernelResult<()> {
        if offset % REG_WIDTH != 0 || !self.fits(offset) {
            return Err(KernelError::OutOfRange {
                name: "register offset",
                value: offset as u64,
                max: self.size.saturating_sub(REG_WIDTH) as u64,
            });
        }
        Ok(())
    }

    // Used by `register_block!` accessors, whose offsets were validated when
    // the block was constructed.
    #[inline]
    pub(crate) fn read_reg(&self, offset: usize) -> u32 {
        debug_assert!(self.fits(offset));
        self.bus.read32(self.base + offset)
    }

    #[inline]
    pub(crate) fn write_reg(&self, offset: usize, value: u32) {
        debug_assert!(self.fits(offset));
        self.bus.write32(self.base + offset, value);
    }
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("base", &format_args!("0x{:x}", self.base))
            .field("size", &format_args!("0x{:x}", self.size))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Register block DSL
// ---------------------------------------------------------------------------

/// Declare a block of 32-bit registers at fixed offsets of a window.
///
/// ```ignore
/// register_block! {
///     /// Doc comment for the struct.
///     pub struct Regs {
///         /// Doc comment for the register.
///         [0x04; ro] STATUS => status;
///         [0x08; wo] CONTROL => set_control;
///         [0x0C; rw] DATA => data, set_data;
///     }
/// }
/// ```
///
/// Generates one offset constant per register, a `SIZE` constant covering
/// the highest register, `new(window)` which fails with
/// [`KernelError::MapError`] if the window is too small, and a reader
/// (`ro`), writer (`wo`), or both (`rw`).
macro_rules! register_block {
    (@access ro $konst:ident $read:ident) => {
        #[inline]
        pub fn $read(&self) -> u32 {
            self.window.read_reg(Self::$konst)
        }
    };

    (@access wo $konst:ident $write:ident) => {
        #[inline]
        pub fn $write(&self, value: u32) {
            self.window.write_reg(Self::$konst, value)
        }
    };

    (@access rw $konst:ident $read:ident, $write:ident) => {
        $crate::mmio::register_block!(@access ro $konst $read);
        $crate::mmio::register_block!(@access wo $konst $write);
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$rmeta:meta])*
                [$offset:literal; $access:ident] $konst:ident => $($method:ident),+
            );* $(;)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            window: $crate::mmio::RegisterWindow,
        }

        #[allow(dead_code)]
        impl $name {
            $(
                $(#[$rmeta])*
                pub const $konst: usize = $offset;
            )*

            /// Bytes of window the block needs.
            pub const SIZE: usize = {
                let offsets: &[usize] = &[$($offset),*];
                let mut max = 0;
                let mut i = 0;
                while i < offsets.len() {
                    if offsets[i] > max {
                        max = offsets[i];
                    }
                    i += 1;
                }
                max + $crate::mmio::REG_WIDTH
            };

            /// Wrap `window`, checking that it covers every register.
            pub fn new(
                window: $crate::mmio::RegisterWindow,
            ) -> $crate::error::KernelResult<Self> {
                if !window.covers(Self::SIZE) {
                    return Err($crate::error::KernelError::MapError {
                        phys: window.base(),
                        size: Self::SIZE,
                    });
                }
                Ok(Self { window })
            }

            /// The underlying window.
            pub fn window(&self) -> &$crate::mmio::RegisterWindow {
                &self.window
            }

            /// Issue the bus barrier.
            pub fn barrier(&self) {
                self.window.barrier();
            }

            $(
                $crate::mmio::register_block!(@access $access $konst $($method),+);
            )*
        }
    };
}

pub(crate) use register_block;
