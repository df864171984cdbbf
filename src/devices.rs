//! I/O device contract and bus, addressed by the `IOX`/`IOXT`/`IDENT`
//! instructions' 11-bit device address space.
//!
//! Grounded on `original_source/src/devices/io.c`: devices are registered
//! against a device number, `ioi`/`ioo` read/write a device register, and a
//! device that is currently requesting an interrupt answers `IDENT` for its
//! priority level with its identification code.

/// One addressable I/O device. `ioi`/`ioo` are the ND-100 "IO Input"/"IO
/// Output" primitives; `address` is the low bits of the IOX operand with
/// the device's own base subtracted off by the bus.
pub trait IoDevice {
    fn ioi(&mut self, register: u16) -> u16;
    fn ioo(&mut self, register: u16, value: u16);
    /// Priority level (10-13) this device raises interrupts on, if any.
    fn interrupt_level(&self) -> Option<u8> {
        None
    }
    /// True while this device has a pending, unacknowledged interrupt at
    /// `interrupt_level()`; `IDENT` clears it and returns `ident_code()`.
    fn interrupt_pending(&self) -> bool {
        false
    }
    fn ident_code(&mut self) -> u16 {
        0
    }
    /// `DeviceManager_Tick`'s per-device half: advance any internal timers
    /// or queues before this tick's interrupt bits are collected.
    fn tick(&mut self) {}
}

/// Capacity and write-protect status a block device reports for a unit,
/// per `machine_block_disk_info`.
pub struct DiskInfo {
    pub size_blocks: u32,
    pub write_protected: bool,
}

/// Callback contract for disk/tape-style storage devices, grounded on
/// `original_source/src/devices/devicemanager.c`'s `Device_SetBlockRead`/
/// `Device_SetBlockWrite`/`Device_SetBlockDiskInfo` registration. No
/// concrete storage device ships with this core (§1); the contract exists
/// so one can be attached to the bus without touching `IoBus`.
pub trait BlockDevice {
    /// Reads `blocks` fixed-size sectors starting at `block_addr` on `unit`
    /// into `buffer`; returns false on an out-of-range or failed transfer.
    fn read(&mut self, buffer: &mut [u16], blocks: u16, block_addr: u32, unit: u16) -> bool;
    /// Writes `blocks` sectors from `buffer` starting at `block_addr` on
    /// `unit`; returns false on an out-of-range or failed transfer.
    fn write(&mut self, buffer: &[u16], blocks: u16, block_addr: u32, unit: u16) -> bool;
    fn disk_info(&self, unit: u16) -> DiskInfo;
}

/// Callback contract for terminal-style character devices: `queue_key`
/// feeds one input byte (the keyboard poll in `IO_Tick`), and `carrier`
/// reports the modem/terminal connection state SINTRAN polls before
/// treating a line as attached.
pub trait CharDevice {
    fn queue_key(&mut self, ch: u8);
    fn carrier(&self) -> bool;
}

struct Slot {
    device_number: u16,
    registers: u16,
    device: Box<dyn IoDevice>,
}

/// Device registry addressed by IOX device number (bits 5-10 of the IOX
/// operand) and register-within-device (bits 0-4).
pub struct IoBus {
    slots: Vec<Slot>,
}

impl IoBus {
    pub fn new() -> Self {
        IoBus { slots: Vec::new() }
    }

    /// Boots with the two always-present console/clock devices, matching
    /// the source's default `io_init` registrations.
    pub fn with_defaults() -> Self {
        let mut bus = IoBus::new();
        bus.attach(1, 4, Box::new(ConsoleDevice::new()));
        bus.attach(3, 2, Box::new(ClockDevice::new()));
        bus
    }

    pub fn attach(&mut self, device_number: u16, registers: u16, device: Box<dyn IoDevice>) {
        self.slots.push(Slot {
            device_number,
            registers,
            device,
        });
    }

    fn find(&mut self, address: u16) -> Option<(&mut Slot, u16)> {
        let device_number = address >> 5;
        let register = address & 0x1f;
        self.slots
            .iter_mut()
            .find(|s| s.device_number == device_number && register < s.registers)
            .map(|s| {
                let reg = register;
                (s, reg)
            })
    }

    pub fn ioi(&mut self, address: u16) -> u16 {
        match self.find(address) {
            Some((slot, reg)) => slot.device.ioi(reg),
            None => 0,
        }
    }

    pub fn ioo(&mut self, address: u16, value: u16) {
        if let Some((slot, reg)) = self.find(address) {
            slot.device.ioo(reg, value);
        }
    }

    /// `IO_Ident`: finds the first device asserting an interrupt at
    /// `level`, clears its request, and returns its identification code.
    pub fn ident(&mut self, level: u8) -> Option<u16> {
        self.slots
            .iter_mut()
            .find(|s| s.device.interrupt_level() == Some(level) && s.device.interrupt_pending())
            .map(|s| s.device.ident_code())
    }

    /// `DeviceManager_Tick`: advances every device one tick and folds
    /// whichever interrupt levels are now pending into the bitmap
    /// `Cpu::tick` feeds to `Registers::device_interrupt`.
    pub fn poll(&mut self) -> u16 {
        let mut bits = 0u16;
        for slot in self.slots.iter_mut() {
            slot.device.tick();
            if let Some(level) = slot.device.interrupt_level() {
                if slot.device.interrupt_pending() {
                    bits |= 1 << level;
                }
            }
        }
        bits
    }
}

impl Default for IoBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A minimal ASCII terminal: register 0 is status, register 1 is the data
/// register (write transmits, read receives either a queued input byte or
/// the last transmitted one).
pub struct ConsoleDevice {
    data: u16,
    ready: bool,
    input: std::collections::VecDeque<u8>,
}

impl ConsoleDevice {
    pub fn new() -> Self {
        ConsoleDevice {
            data: 0,
            ready: true,
            input: std::collections::VecDeque::new(),
        }
    }
}

impl Default for ConsoleDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl IoDevice for ConsoleDevice {
    fn ioi(&mut self, register: u16) -> u16 {
        match register {
            0 => if self.ready { 1 } else { 0 },
            1 => self.input.pop_front().map(|b| b as u16).unwrap_or(self.data),
            _ => 0,
        }
    }

    fn ioo(&mut self, register: u16, value: u16) {
        if register == 1 {
            self.data = value;
            print!("{}", (value & 0x7f) as u8 as char);
        }
    }
}

impl CharDevice for ConsoleDevice {
    /// `Terminal_QueueKeyCode`: buffers one input byte for the next read of
    /// register 1, translating `\n` to `\r` the way SINTRAN expects.
    fn queue_key(&mut self, ch: u8) {
        self.input.push_back(if ch == b'\n' { b'\r' } else { ch });
    }

    fn carrier(&self) -> bool {
        true
    }
}

/// A free-running interval timer; register 0 reads a tick counter that
/// advances once per `ioi` poll, matching the source's programmable clock
/// device in its simplest (non-interrupting) mode.
pub struct ClockDevice {
    ticks: u16,
}

impl ClockDevice {
    pub fn new() -> Self {
        ClockDevice { ticks: 0 }
    }
}

impl Default for ClockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl IoDevice for ClockDevice {
    fn ioi(&mut self, register: u16) -> u16 {
        if register == 0 {
            self.ticks = self.ticks.wrapping_add(1);
        }
        self.ticks
    }

    fn ioo(&mut self, _register: u16, _value: u16) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_echoes_written_byte_into_data_register() {
        let mut bus = IoBus::new();
        bus.attach(1, 4, Box::new(ConsoleDevice::new()));
        bus.ioo(1 << 5 | 1, 'A' as u16);
        assert_eq!(bus.ioi(1 << 5 | 1), 'A' as u16);
    }

    #[test]
    fn unmapped_address_reads_as_zero() {
        let mut bus = IoBus::new();
        assert_eq!(bus.ioi(0x3ff), 0);
    }

    #[test]
    fn ident_returns_none_without_a_pending_device_interrupt() {
        let mut bus = IoBus::with_defaults();
        assert_eq!(bus.ident(11), None);
    }

    #[test]
    fn queued_key_is_read_back_from_register_one() {
        let mut console = ConsoleDevice::new();
        console.queue_key(b'A');
        assert_eq!(console.ioi(1), b'A' as u16);
        assert!(console.carrier());
    }

    struct AlwaysInterrupting;
    impl IoDevice for AlwaysInterrupting {
        fn ioi(&mut self, _register: u16) -> u16 {
            0
        }
        fn ioo(&mut self, _register: u16, _value: u16) {}
        fn interrupt_level(&self) -> Option<u8> {
            Some(11)
        }
        fn interrupt_pending(&self) -> bool {
            true
        }
        fn ident_code(&mut self) -> u16 {
            0o1234
        }
    }

    #[test]
    fn poll_folds_a_pending_device_interrupt_into_the_bitmap() {
        let mut bus = IoBus::new();
        bus.attach(5, 1, Box::new(AlwaysInterrupting));
        assert_eq!(bus.poll(), 1 << 11);
    }
}
