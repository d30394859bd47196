use crate::num::GetBit;
use bincode::{Decode, Encode};

/// A snapshot of one controller's buttons, as reported by the host's input
/// poller. The core only latches and shifts these; reading actual input
/// devices is the frontend's job.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct JoypadState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub start: bool,
    pub select: bool,
}

impl JoypadState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn latch(self) -> LatchedJoypadState {
        let bitstream = (u8::from(self.right) << 7)
            | (u8::from(self.left) << 6)
            | (u8::from(self.down) << 5)
            | (u8::from(self.up) << 4)
            | (u8::from(self.start) << 3)
            | (u8::from(self.select) << 2)
            | (u8::from(self.b) << 1)
            | u8::from(self.a);
        LatchedJoypadState(bitstream)
    }
}

/// A latched controller shift register. A is reported first; once all eight
/// buttons have been shifted out, further reads return 1s.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub(crate) struct LatchedJoypadState(u8);

impl LatchedJoypadState {
    fn next_bit(self) -> u8 {
        self.0 & 0x01
    }

    #[must_use]
    fn shift(self) -> Self {
        Self((self.0 >> 1) | 0x80)
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Joypads {
    p1: JoypadState,
    p2: JoypadState,
    p1_latch: LatchedJoypadState,
    p2_latch: LatchedJoypadState,
    strobe: bool,
}

impl Joypads {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_p1(&mut self, joypad_state: JoypadState) {
        self.p1 = joypad_state;
    }

    pub(crate) fn set_p2(&mut self, joypad_state: JoypadState) {
        self.p2 = joypad_state;
    }

    /// Writes to $4016. Bit 0 is the strobe; while it is high, reads
    /// continuously re-latch the live button state, and a 1->0 edge freezes
    /// the shift registers.
    pub(crate) fn write_strobe(&mut self, value: u8) {
        self.strobe = value.bit(0);
        if self.strobe {
            self.p1_latch = self.p1.latch();
            self.p2_latch = self.p2.latch();
        }
    }

    pub(crate) fn read_p1(&mut self) -> u8 {
        if self.strobe {
            self.p1_latch = self.p1.latch();
        }

        let bit = self.p1_latch.next_bit();
        self.p1_latch = self.p1_latch.shift();
        bit
    }

    pub(crate) fn read_p2(&mut self) -> u8 {
        if self.strobe {
            self.p2_latch = self.p2.latch();
        }

        let bit = self.p2_latch.next_bit();
        self.p2_latch = self.p2_latch.shift();
        bit
    }
}
