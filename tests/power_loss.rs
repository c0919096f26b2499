//! Simulates power loss at every possible driver-call boundary during a single
//! mutation and checks that reinitializing afterwards always observes either
//! the pre-mutation state or the fully-applied post-mutation state, never an
//! intermediate one. This is property 5 from this crate's design notes.

#![cfg(feature = "host")]

use fast_flash_table::mock_flash::MockFlash;
use fast_flash_table::{Engine, Error, FlashDriver, Result};

const TOTAL_SIZE: u32 = 16 * 1024;

/// No single mutation exercised in this test performs anywhere near this many
/// program/erase calls, so using it as the "unlimited" budget and subtracting
/// what remains afterward recovers the exact number of calls actually made.
const WRITE_BUDGET: u32 = 1_000_000;

/// Wraps a [`MockFlash`], forwarding every call until a configured number of
/// program/erase calls have succeeded, then failing every call after that as
/// if the device had lost power mid-operation. Reads always pass through,
/// matching a device that is still readable after an interrupted write.
struct FailAfter {
    inner: MockFlash,
    remaining_writes: u32,
}

impl FailAfter {
    fn unlimited(inner: MockFlash) -> Self {
        Self { inner, remaining_writes: WRITE_BUDGET }
    }

    fn limited(inner: MockFlash, allowed_writes: u32) -> Self {
        Self { inner, remaining_writes: allowed_writes }
    }

    fn into_inner(self) -> MockFlash {
        self.inner
    }

    fn consume_one_write(&mut self) -> Result<()> {
        if self.remaining_writes == 0 {
            return Err(Error::DriverError);
        }
        self.remaining_writes -= 1;
        Ok(())
    }
}

impl FlashDriver for FailAfter {
    fn init(&mut self) -> Result<()> {
        self.inner.init()
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.inner.read(addr, buf)
    }

    fn program(&mut self, addr: u32, buf: &[u8]) -> Result<()> {
        self.consume_one_write()?;
        self.inner.program(addr, buf)
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        self.consume_one_write()?;
        self.inner.erase(addr, len)
    }
}

fn encode_row(value: u32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&value.to_le_bytes());
    buf
}

fn decode_row(buf: &[u8; 8]) -> u32 {
    u32::from_le_bytes(buf[0..4].try_into().unwrap())
}

fn read_all_rows(engine: &mut Engine<impl FlashDriver>, name: &str) -> Vec<u32> {
    let count = engine.get_table_count(name).unwrap();
    (0..count)
        .map(|index| {
            let mut buf = [0u8; 8];
            engine.read_table_data(name, index, &mut buf).unwrap();
            decode_row(&buf)
        })
        .collect()
}

/// Count how many `program`/`erase` calls one mutation makes against a fresh
/// copy of `pre_bytes`, by letting it run to completion unthrottled.
fn count_write_calls(pre_bytes: &[u8], mutate: impl Fn(&mut Engine<FailAfter>)) -> u32 {
    let driver = FailAfter::unlimited(MockFlash::from_snapshot(pre_bytes.to_vec()));
    let mut engine = Engine::init(driver, TOTAL_SIZE, true).unwrap();
    mutate(&mut engine);
    WRITE_BUDGET - engine.into_driver().remaining_writes
}

#[test]
fn append_survives_power_loss_at_every_write_boundary() {
    // Establish a baseline: one table with two committed rows.
    let setup_driver = MockFlash::new(TOTAL_SIZE);
    let mut setup_engine = Engine::init(setup_driver, TOTAL_SIZE, true).unwrap();
    setup_engine.create_table("T", 8, 50).unwrap();
    setup_engine.write_table_data("T", &encode_row(10)).unwrap();
    setup_engine.write_table_data("T", &encode_row(20)).unwrap();
    let pre_bytes = setup_engine.into_driver().snapshot();

    let pre_rows = {
        let mut engine = Engine::init(MockFlash::from_snapshot(pre_bytes.clone()), TOTAL_SIZE, true).unwrap();
        read_all_rows(&mut engine, "T")
    };
    let mut post_rows = pre_rows.clone();
    post_rows.push(30);

    let mutate = |engine: &mut Engine<FailAfter>| {
        let _ = engine.write_table_data("T", &encode_row(30));
    };

    let total_calls = count_write_calls(&pre_bytes, mutate);
    assert!(total_calls > 0, "the append should perform at least one flash write");

    for allowed in 0..=total_calls {
        let driver = FailAfter::limited(MockFlash::from_snapshot(pre_bytes.clone()), allowed);
        let mut engine = Engine::init(driver, TOTAL_SIZE, true).unwrap();
        let _ = engine.write_table_data("T", &encode_row(30));
        let bytes_after = engine.into_driver().into_inner().snapshot();

        let mut rebooted = Engine::init(MockFlash::from_snapshot(bytes_after), TOTAL_SIZE, true).unwrap();
        let observed = read_all_rows(&mut rebooted, "T");
        assert!(
            observed == pre_rows || observed == post_rows,
            "allowed={allowed}: observed {observed:?} matches neither pre {pre_rows:?} nor post {post_rows:?}"
        );
    }
}

#[test]
fn create_table_survives_power_loss_at_every_write_boundary() {
    // Boot once, unthrottled, so the device already carries a committed manager
    // table before the throttled mutation under test begins (matching every
    // other scenario: a fresh-device format is itself durable, not under test
    // here — see `fresh_device_survives_...` below for that case instead).
    let pre_bytes = Engine::init(MockFlash::new(TOTAL_SIZE), TOTAL_SIZE, true)
        .unwrap()
        .into_driver()
        .snapshot();

    let mutate = |engine: &mut Engine<FailAfter>| {
        let _ = engine.create_table("NEW", 8, 10);
    };
    let total_calls = count_write_calls(&pre_bytes, mutate);
    assert!(total_calls > 0, "create_table should perform at least one flash write");

    for allowed in 0..=total_calls {
        let driver = FailAfter::limited(MockFlash::from_snapshot(pre_bytes.clone()), allowed);
        let mut engine = Engine::init(driver, TOTAL_SIZE, true).unwrap();
        let _ = engine.create_table("NEW", 8, 10);
        let bytes_after = engine.into_driver().into_inner().snapshot();

        let rebooted = Engine::init(MockFlash::from_snapshot(bytes_after), TOTAL_SIZE, true).unwrap();
        // Either the table never came into existence, or it exists with zero rows.
        if rebooted.table_exists("NEW") {
            let mut engine = rebooted;
            assert_eq!(engine.get_table_count("NEW").unwrap(), 0);
        }
    }
}

#[test]
fn fresh_device_format_either_succeeds_cleanly_or_fails_without_panicking() {
    // Formatting a never-before-used device is itself a mutation (an erase of
    // sector 0 plus one manager-table program). A throttled driver must either
    // let it land completely or surface a driver error — it must never panic
    // or leave `Engine::init` returning `Ok` over a half-written manager.
    let pre_bytes = MockFlash::new(TOTAL_SIZE).snapshot();

    for allowed in 0..=2 {
        let driver = FailAfter::limited(MockFlash::from_snapshot(pre_bytes.clone()), allowed);
        if let Ok(mut engine) = Engine::init(driver, TOTAL_SIZE, true) {
            assert!(!engine.table_exists("ANYTHING"));
            assert!(matches!(engine.get_table_count("ANYTHING"), Err(Error::NotFound)));
        }
    }

    // With the full two-write budget (erase sector 0, program the manager),
    // formatting always succeeds.
    let driver = FailAfter::limited(MockFlash::from_snapshot(pre_bytes), 2);
    assert!(Engine::init(driver, TOTAL_SIZE, true).is_ok());
}
