use core::fmt;

pub const NUM_GPRS: usize = 32;

pub const REG_V0: usize = 2;
pub const REG_A0: usize = 4;
pub const REG_A1: usize = 5;
pub const REG_A2: usize = 6;
pub const REG_A3: usize = 7;
pub const REG_SP: usize = 29;
pub const REG_RA: usize = 31;

/// User-visible register file of the simulated processor.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub gpr: [i32; NUM_GPRS],
    pub pc: i32,
    pub next_pc: i32,
    /// Exception cause of the last trap into the kernel.
    pub cause: i32,
    /// Faulting address for address-related exceptions.
    pub bad_vaddr: i32,
}

impl Registers {
    pub fn new() -> Self {
        Self {
            gpr: [0; NUM_GPRS],
            pc: 0,
            next_pc: 0,
            cause: 0,
            bad_vaddr: 0,
        }
    }

    /// Register file a freshly loaded program starts with: everything zero
    /// except PC, SP and the argc/argv argument registers.
    pub fn for_entry(entry_point: u32, stack_pointer: u32, argc: i32, argv: u32) -> Self {
        let mut regs = Self::new();
        regs.pc = entry_point as i32;
        regs.next_pc = regs.pc.wrapping_add(4);
        regs.gpr[REG_SP] = stack_pointer as i32;
        regs.gpr[REG_A0] = argc;
        regs.gpr[REG_A1] = argv as i32;
        regs
    }

    /// Syscall number in V0 followed by A0..A3.
    pub fn syscall_args(&self) -> (i32, [i32; 4]) {
        (
            self.gpr[REG_V0],
            [
                self.gpr[REG_A0],
                self.gpr[REG_A1],
                self.gpr[REG_A2],
                self.gpr[REG_A3],
            ],
        )
    }

    pub fn set_return(&mut self, value: i32) {
        self.gpr[REG_V0] = value;
    }

    /// Moves past the trapping instruction.
    pub fn advance_pc(&mut self) {
        self.pc = self.next_pc;
        self.next_pc = self.next_pc.wrapping_add(4);
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut ds = f.debug_struct("Registers");

        ds.field("v0", &format_args!("{:#010x}", self.gpr[REG_V0]))
            .field("a0", &format_args!("{:#010x}", self.gpr[REG_A0]))
            .field("a1", &format_args!("{:#010x}", self.gpr[REG_A1]))
            .field("a2", &format_args!("{:#010x}", self.gpr[REG_A2]))
            .field("a3", &format_args!("{:#010x}", self.gpr[REG_A3]))
            .field("sp", &format_args!("{:#010x}", self.gpr[REG_SP]))
            .field("ra", &format_args!("{:#010x}", self.gpr[REG_RA]))
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("next_pc", &format_args!("{:#010x}", self.next_pc))
            .field("cause", &self.cause)
            .field("bad_vaddr", &format_args!("{:#010x}", self.bad_vaddr));

        ds.finish()
    }
}
