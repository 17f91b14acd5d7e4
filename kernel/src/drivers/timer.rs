//! TRACE32 simulator system timer.
//!
//! One compare/match timer with a free-running 24-bit counter, clocked at
//! 1 MHz. The same hardware backs three consumers: the clock-event device
//! that drives the tick, a clocksource, and the scheduler clock.
//!
//! | Offset | Register | Meaning                                      |
//! |--------|----------|----------------------------------------------|
//! | 0x00   | COMPARE  | cycles until the next expiry                 |
//! | 0x08   | CONTROL  | bit 1 ENABLE, bit 0 CONTINUOUS               |
//! | 0x0C   | STATUS   | write 1 to clear the pending expiry          |
//! | 0x50   | COUNTER  | free-running counter                         |

use alloc::sync::Arc;

use bitflags::bitflags;
use log::{error, info, trace, warn};

use super::{irqchip::InterruptController, ProbeResources};
use crate::{
    config::{
        TIMER_CLOCKEVENT_RATING, TIMER_CLOCKSOURCE_RATING, TIMER_COUNTER_BITS,
        TIMER_DEFAULT_PERIOD, TIMER_FREQ_HZ, TIMER_MAX_DELTA, TIMER_MIN_DELTA,
    },
    error::{KernelError, KernelResult},
    irq::{IrqActionFlags, IrqHandler, IrqReturn, LogicalIrq},
    mmio::{register_block, MmioMapper},
    time::{
        counter_mask, ClockEventDevice, ClockEventFeatures, ClockEventOps, Clocksource,
        CounterRead, SchedClock, TickHandler, TimeServices,
    },
};

/// Device-tree compatible string.
pub const COMPATIBLE: &str = "TRACE32,simulator-timer";

/// Name of the clock-event device.
pub const CLOCKEVENT_NAME: &str = "TIMER";

/// Name of the clocksource backed by the counter.
pub const CLOCKSOURCE_NAME: &str = "simulator_clkevt";

/// Name of the interrupt action.
pub const IRQ_ACTION_NAME: &str = "Simulator Timer Tick";

const STATUS_CLEAR: u32 = 1;

register_block! {
    /// Register block of the timer.
    pub struct TimerRegs {
        [0x00; wo] COMPARE => set_compare;
        [0x08; wo] CONTROL => set_control;
        [0x0C; wo] STATUS => set_status;
        [0x50; ro] COUNTER => counter;
    }
}

bitflags! {
    /// CONTROL register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerControl: u32 {
        /// Restart from the compare value on every expiry.
        const CONTINUOUS = 1 << 0;
        const ENABLE = 1 << 1;
    }
}

impl TimerRegs {
    /// Bring the timer to a known state: stopped, status cleared, then
    /// enabled in one-shot mode with the default period.
    fn reset(&self) {
        self.set_compare(0);
        self.set_control(0);
        self.set_status(STATUS_CLEAR);
        self.set_compare(TIMER_DEFAULT_PERIOD);
        self.set_control(TimerControl::ENABLE.bits());
    }

    /// Read the free-running counter, truncated to its declared width.
    pub fn read_free_running(&self) -> u64 {
        let value = self.counter();
        self.barrier();
        value as u64 & counter_mask(TIMER_COUNTER_BITS)
    }
}

impl ClockEventOps for TimerRegs {
    fn set_next_event(&self, cycles: u32) -> KernelResult<()> {
        self.set_compare(cycles);
        Ok(())
    }

    fn set_state_periodic(&self) -> KernelResult<()> {
        self.set_compare(TIMER_DEFAULT_PERIOD);
        self.set_control((TimerControl::ENABLE | TimerControl::CONTINUOUS).bits());
        Ok(())
    }

    fn set_state_shutdown(&self) -> KernelResult<()> {
        self.set_control(TimerControl::ENABLE.bits());
        self.set_compare(TIMER_DEFAULT_PERIOD);
        Ok(())
    }
}

impl CounterRead for TimerRegs {
    fn read_counter(&self) -> u64 {
        self.read_free_running()
    }
}

/// A probed timer.
pub struct Trace32Timer {
    regs: TimerRegs,
    irq: LogicalIrq,
    clock_event: Arc<ClockEventDevice>,
    clocksource: Arc<Clocksource>,
    sched_clock: Arc<SchedClock>,
    tick: Arc<dyn TickHandler>,
}

impl Trace32Timer {
    /// Probe the timer.
    ///
    /// Resolves the register window and interrupt line, resets the
    /// hardware, attaches the tick interrupt and registers the clocksource,
    /// clock-event device and scheduler clock with `time`.
    ///
    /// On failure nothing stays registered and the interrupt line is
    /// unmapped again.
    pub fn init(
        mapper: &dyn MmioMapper,
        res: &ProbeResources,
        controller: &InterruptController,
        time: &TimeServices,
    ) -> KernelResult<Arc<Self>> {
        let base = res.base.ok_or(KernelError::UnresolvedResource {
            device: CLOCKEVENT_NAME,
            resource: "register window",
        })?;
        let window = mapper
            .iomap(base, res.size.unwrap_or(TimerRegs::SIZE))
            .inspect_err(|e| error!("[TIMER] {}", e))?;
        let regs = TimerRegs::new(window)?;

        let irq = controller
            .irq_of_parse_and_map(CLOCKEVENT_NAME, &res.interrupts)
            .inspect_err(|e| error!("[TIMER] unable to get interrupt: {}", e))?;

        match Self::attach(regs, irq, controller, time) {
            Ok(timer) => Ok(timer),
            Err(e) => {
                error!("[TIMER] probe failed: {}", e);
                if let Err(undo) = controller.unmap(irq) {
                    warn!("[TIMER] unable to unmap {}: {}", irq, undo);
                }
                Err(e)
            }
        }
    }

    fn attach(
        regs: TimerRegs,
        irq: LogicalIrq,
        controller: &InterruptController,
        time: &TimeServices,
    ) -> KernelResult<Arc<Self>> {
        regs.reset();

        let mut clock_event = ClockEventDevice::new(
            CLOCKEVENT_NAME,
            ClockEventFeatures::PERIODIC | ClockEventFeatures::ONESHOT,
            TIMER_CLOCKEVENT_RATING,
            Arc::new(regs.clone()),
        )
        .with_cpumask(1);
        clock_event.configure(TIMER_FREQ_HZ, TIMER_MIN_DELTA, TIMER_MAX_DELTA)?;

        let counter: Arc<dyn CounterRead> = Arc::new(regs.clone());
        let clocksource = Arc::new(Clocksource::new(
            CLOCKSOURCE_NAME,
            TIMER_CLOCKSOURCE_RATING,
            TIMER_FREQ_HZ,
            TIMER_COUNTER_BITS,
            counter.clone(),
        )?);
        let sched_clock = Arc::new(SchedClock::new(
            counter,
            TIMER_COUNTER_BITS,
            TIMER_FREQ_HZ,
        )?);

        let timer = Arc::new(Self {
            regs,
            irq,
            clock_event: Arc::new(clock_event),
            clocksource,
            sched_clock,
            tick: time.tick.clone(),
        });

        controller.descs().request_irq(
            irq,
            IRQ_ACTION_NAME,
            IrqActionFlags::TIMER
                | IrqActionFlags::IRQPOLL
                | IrqActionFlags::NO_SUSPEND
                | IrqActionFlags::NO_THREAD,
            timer.clone(),
        )?;

        if let Err(e) = time.clocksources.register(timer.clocksource.clone()) {
            error!("[TIMER] failed to register clocksource: {}", e);
            timer.release_irq(controller);
            return Err(e);
        }
        if let Err(e) = time.clockevents.register(timer.clock_event.clone()) {
            error!("[TIMER] failed to register clockevent: {}", e);
            if let Err(undo) = time.clocksources.unregister(&timer.clocksource) {
                warn!("[TIMER] {}", undo);
            }
            timer.release_irq(controller);
            return Err(e);
        }
        time.sched_clock.register(timer.sched_clock.clone());

        info!(
            "[TIMER] {} at {:#x}: {} Hz, {}",
            CLOCKEVENT_NAME,
            timer.regs.window().base(),
            TIMER_FREQ_HZ,
            irq
        );
        Ok(timer)
    }

    fn release_irq(&self, controller: &InterruptController) {
        if let Err(e) = controller.descs().free_irq(self.irq) {
            warn!("[TIMER] unable to free {}: {}", self.irq, e);
        }
    }

    pub fn irq(&self) -> LogicalIrq {
        self.irq
    }

    pub fn clock_event(&self) -> &Arc<ClockEventDevice> {
        &self.clock_event
    }

    pub fn clocksource(&self) -> &Arc<Clocksource> {
        &self.clocksource
    }

    pub fn sched_clock(&self) -> &Arc<SchedClock> {
        &self.sched_clock
    }

    /// Program a one-shot expiry `cycles` from now.
    pub fn set_next_event(&self, cycles: u64) -> KernelResult<()> {
        self.clock_event.set_next_event(cycles)
    }

    /// Program a one-shot expiry `delta_ns` nanoseconds from now.
    pub fn set_next_event_ns(&self, delta_ns: u64) -> KernelResult<()> {
        self.clock_event.set_next_event_ns(delta_ns)
    }

    pub fn set_periodic(&self) -> KernelResult<()> {
        self.clock_event.set_periodic()
    }

    pub fn shutdown(&self) -> KernelResult<()> {
        self.clock_event.shutdown()
    }

    pub fn tick_resume(&self) -> KernelResult<()> {
        self.clock_event.tick_resume()
    }

    /// Current free-running counter value.
    pub fn read_counter(&self) -> u64 {
        self.regs.read_free_running()
    }
}

impl IrqHandler for Trace32Timer {
    fn handle_irq(&self, irq: LogicalIrq) -> IrqReturn {
        self.regs.set_status(STATUS_CLEAR);
        trace!("[TIMER] expiry on {}", irq);
        self.tick.handle_tick(&self.clock_event);
        IrqReturn::Handled
    }
}
