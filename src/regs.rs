/// 32-bit register access relative to a controller base.
///
/// Implementations must perform every access, in program order; the driver
/// relies on reads and writes having side effects (write-1-to-clear status,
/// self-clearing control bits).
pub trait RegisterIo: Send + Sync {
    fn read_reg32(&self, offset: u32) -> u32;
    fn write_reg32(&self, offset: u32, value: u32);

    #[inline]
    fn modify_reg32(&self, offset: u32, clear: u32, set: u32) -> u32 {
        let value = (self.read_reg32(offset) & !clear) | set;
        self.write_reg32(offset, value);
        value
    }

    /// 64-bit store. The default splits it into two 32-bit writes, low word
    /// first; memory-mapped blocks issue a single access.
    #[inline]
    fn write_reg64(&self, offset: u32, value: u64) {
        self.write_reg32(offset, value as u32);
        self.write_reg32(offset + 4, (value >> 32) as u32);
    }
}

#[macro_export]
macro_rules! impl_register_ops {
    ($struct_name:ident, $field_name:ident) => {
        impl $crate::regs::RegisterIo for $struct_name {
            #[inline]
            fn read_reg32(&self, offset: u32) -> u32 {
                unsafe {
                    ::core::ptr::read_volatile((self.$field_name + offset as usize) as *const u32)
                }
            }

            #[inline]
            fn write_reg32(&self, offset: u32, value: u32) {
                unsafe {
                    ::core::ptr::write_volatile(
                        (self.$field_name + offset as usize) as *mut u32,
                        value,
                    )
                }
            }

            #[inline]
            fn write_reg64(&self, offset: u32, value: u64) {
                unsafe {
                    ::core::ptr::write_volatile(
                        (self.$field_name + offset as usize) as *mut u64,
                        value,
                    )
                }
            }
        }
    };
}

/// Memory-mapped register block at a fixed base address.
#[derive(Debug, Clone, Copy)]
pub struct MmioRegs {
    base_addr: usize,
}

impl MmioRegs {
    /// # Safety
    ///
    /// `base_addr` must be the mapped base of the register block and stay
    /// mapped for the lifetime of the value.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    pub fn base_addr(&self) -> usize {
        self.base_addr
    }
}

impl_register_ops!(MmioRegs, base_addr);
