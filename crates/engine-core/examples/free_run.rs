//! Boots an engine with the idle capability, free-runs it briefly and prints
//! the cycles the paced loop executed.

use std::thread;
use std::time::Duration;

use engine_core::{
    Engine, EngineConfig, EngineError, IdleCapability, SchedulerState, CPU_DEVICE_ID,
    RAM_SPACE_ID, REG_E0,
};
use proptest as _;
use rstest as _;
use spin_sleep as _;
use thiserror as _;

fn main() -> Result<(), EngineError> {
    let engine = Engine::init(EngineConfig::default(), Box::new(IdleCapability))?;
    println!("booted: pc={:#05X} sp={:#05X}", engine.pc(), engine.sp());

    engine.mem_write(RAM_SPACE_ID, 0x10, &[0xAA, 0xBB, 0xCC, 0xDD])?;
    engine.set_register(CPU_DEVICE_ID, REG_E0, 0xABC)?;

    engine.run()?;
    thread::sleep(Duration::from_millis(500));
    engine.stop()?;
    while engine.scheduler_state() == SchedulerState::Running {
        thread::sleep(Duration::from_millis(5));
    }

    println!("cycles executed: {}", engine.cycle_count());
    println!(
        "ram[0x10..0x14] = {:02X?}",
        engine.mem_read(RAM_SPACE_ID, 0x10, 4)?
    );
    println!(
        "E0 = {:#05X}",
        engine.get_register(CPU_DEVICE_ID, REG_E0)?
    );
    Ok(())
}
