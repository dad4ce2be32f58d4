use std::sync::Mutex;

use w1_bus::{
    calc_crc, search::search, Address, Bus, BusSearcher, Error, Pullup, TripletResult,
    ALARM_SEARCH, SEARCH_ROM,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds a ROM code with a valid CRC.
fn rom(family: u8, serial: u64) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[0] = family;
    bytes[1..7].copy_from_slice(&serial.to_le_bytes()[..6]);
    bytes[7] = calc_crc(&bytes[..7]);
    u64::from_le_bytes(bytes)
}

#[derive(Default)]
struct State {
    active: Vec<bool>,
    bit: u32,
    commands: Vec<u8>,
    triplets: usize,
}

/// Wired-AND bus: a bit reads as present when any active device drives it.
#[derive(Default)]
struct SimBus {
    devices: Vec<u64>,
    alarmed: Vec<u64>,
    fail_tx: bool,
    fail_triplet: Option<usize>,
    vanish_at_triplet: Option<usize>,
    state: Mutex<State>,
}

impl SimBus {
    fn new(devices: &[u64]) -> Self {
        Self {
            devices: devices.to_vec(),
            ..Default::default()
        }
    }

    fn commands(&self) -> Vec<u8> {
        self.state.lock().unwrap().commands.clone()
    }

    fn triplets(&self) -> usize {
        self.state.lock().unwrap().triplets
    }
}

impl Bus for SimBus {
    fn tx(&self, w: &[u8], _r: &mut [u8], _pull: Pullup) -> Result<(), Error> {
        if self.fail_tx {
            return Err(Error::ShortedBus);
        }
        let mut state = self.state.lock().unwrap();
        state.commands.extend_from_slice(w);
        let alarm_only = w.first() == Some(&ALARM_SEARCH);
        state.active = self
            .devices
            .iter()
            .map(|d| !alarm_only || self.alarmed.contains(d))
            .collect();
        state.bit = 0;
        Ok(())
    }

    fn search(&self, alarm_only: bool) -> Result<Vec<Address>, Error> {
        search(self, alarm_only)
    }
}

impl BusSearcher for SimBus {
    fn search_triplet(&self, direction: bool) -> Result<TripletResult, Error> {
        let mut state = self.state.lock().unwrap();
        if self.fail_triplet == Some(state.triplets) {
            return Err(Error::BusFault("triplet timed out".into()));
        }
        if self.vanish_at_triplet == Some(state.triplets) {
            state.active.iter_mut().for_each(|a| *a = false);
        }
        state.triplets += 1;

        let bit = state.bit;
        let bits: Vec<Option<bool>> = self
            .devices
            .iter()
            .zip(&state.active)
            .map(|(d, &active)| active.then(|| (d >> bit) & 1 == 1))
            .collect();
        let got_zero = bits.contains(&Some(false));
        let got_one = bits.contains(&Some(true));
        let taken = if got_zero && got_one { direction } else { got_one };

        for (active, b) in state.active.iter_mut().zip(bits) {
            if b.is_some() && b != Some(taken) {
                *active = false;
            }
        }
        state.bit += 1;
        Ok(TripletResult {
            got_zero,
            got_one,
            taken,
        })
    }
}

fn sorted(mut addrs: Vec<Address>) -> Vec<u64> {
    let mut out: Vec<u64> = addrs.drain(..).map(u64::from).collect();
    out.sort_unstable();
    out
}

#[test]
fn finds_every_device() {
    init();
    let mut devices = vec![
        rom(0x28, 0x0000070e41ac),
        rom(0x28, 0x0000070e41ad),
        rom(0x10, 0x000801b81c02),
        rom(0x3b, 0x123456789abc),
        rom(0x01, 0x000000000001),
        rom(0x28, 0x800000000000),
    ];
    let bus = SimBus::new(&devices);

    let found = bus.search(false).unwrap();
    assert!(found.iter().all(|a| a.is_valid()));
    devices.sort_unstable();
    assert_eq!(sorted(found), devices);

    // one pass of 64 triplets per device
    assert_eq!(bus.triplets(), 64 * devices.len());
    assert_eq!(bus.commands(), vec![SEARCH_ROM; devices.len()]);
}

#[test]
fn extreme_addresses() {
    init();
    let bus = SimBus::new(&[u64::MAX, 0]);
    let found = bus.search(false).unwrap();
    assert_eq!(sorted(found.clone()), [0, u64::MAX]);
    // an all-ones address fails its CRC but is still reported
    assert!(found.contains(&Address(u64::MAX)));
    assert!(!Address(u64::MAX).is_valid());

    let bus = SimBus::new(&[0x8000000000000001, 0x0000000000000001]);
    assert_eq!(
        sorted(bus.search(false).unwrap()),
        [0x0000000000000001, 0x8000000000000001]
    );
    assert_eq!(bus.triplets(), 128);
}

#[test]
fn single_device() {
    init();
    let addr = rom(0x28, 0x0000070e41ac);
    let bus = SimBus::new(&[addr]);
    assert_eq!(bus.search(false).unwrap(), vec![Address(addr)]);
    assert_eq!(bus.triplets(), 64);
}

#[test]
fn empty_bus() {
    init();
    let bus = SimBus::new(&[]);
    assert!(bus.search(false).unwrap().is_empty());
    assert_eq!(bus.commands(), [SEARCH_ROM]);
    assert_eq!(bus.triplets(), 1);
}

#[test]
fn alarm_search_only_reports_alarmed_devices() {
    init();
    let hot = rom(0x28, 0x000000000042);
    let mut bus = SimBus::new(&[rom(0x28, 0x000000000041), hot, rom(0x10, 0x000000000007)]);
    bus.alarmed = vec![hot];

    assert_eq!(bus.search(true).unwrap(), vec![Address(hot)]);
    assert_eq!(bus.commands(), [ALARM_SEARCH]);
}

#[test]
fn failing_arm_command_means_no_devices() {
    init();
    let mut bus = SimBus::new(&[rom(0x28, 1)]);
    bus.fail_tx = true;
    assert!(bus.search(false).unwrap_err().no_devices());
    assert_eq!(bus.triplets(), 0);
}

#[test]
fn triplet_error_discards_partial_results() {
    init();
    let mut bus = SimBus::new(&[rom(0x28, 1), rom(0x28, 2), rom(0x28, 3)]);
    // fails during the second pass, after one device was found
    bus.fail_triplet = Some(70);
    let err = bus.search(false).unwrap_err();
    assert!(matches!(err, Error::BusFault(_)));
}

#[test]
fn devices_leaving_mid_pass_is_a_bus_fault() {
    init();
    let mut bus = SimBus::new(&[rom(0x28, 1), rom(0x28, 2)]);
    bus.vanish_at_triplet = Some(10);
    let err = bus.search(false).unwrap_err();
    assert!(matches!(err, Error::BusFault(_)));
    assert!(err.is_bus_error());
}
