use clap::Parser;
use std::{
    convert::Infallible,
    future::Future,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use drive_core::utils::{
    config::MixerConfig,
    controllers::{
        sweep, ActuatorError, ControllerConfig, Drv8835, NullPulseController,
        Pca9685PulseController, SharedBus, SpeedController, StdDelay,
    },
    AckermannMixer, ActuatorMixer, DifferentialDriveMixer, PulseController, VehicleConfig,
};
use embedded_hal::{
    digital::OutputPin,
    i2c::{I2c, Operation},
    pwm::SetDutyCycle,
};
use embedded_hal_bus::i2c::MutexDevice;
use static_cell::StaticCell;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts {
    /// vehicle config (JSON); built-in defaults when omitted
    #[clap(long)]
    config: Option<PathBuf>,
    /// drive loop ticks to run
    #[clap(long, default_value_t = 20)]
    ticks: u32,
    /// steering command held for every tick
    #[clap(long, default_value_t = 0.0, allow_hyphen_values = true)]
    steering: f32,
    /// throttle command held for every tick
    #[clap(long, default_value_t = 0.3, allow_hyphen_values = true)]
    throttle: f32,
    /// bench-test each wheel motor before driving
    #[clap(long)]
    sweep: bool,
}

/// I2C bus that logs to console instead of reaching a chip.
struct SimI2c;

impl embedded_hal::i2c::ErrorType for SimI2c {
    type Error = Infallible;
}

impl I2c for SimI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations {
            match op {
                Operation::Write(bytes) => debug!("I2C 0x{:02X} <- {:02X?}", address, bytes),
                Operation::Read(buf) => buf.fill(0),
            }
        }
        Ok(())
    }
}

struct SimPwm(&'static str);

impl embedded_hal::pwm::ErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        debug!(pin = self.0, duty, "PWM");
        Ok(())
    }
}

struct SimPin(&'static str);

impl embedded_hal::digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        debug!(pin = self.0, "low");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        debug!(pin = self.0, "high");
        Ok(())
    }
}

type SimBus = MutexDevice<'static, SimI2c>;
type SimDrv8835 = Drv8835<SimPwm, SimPin>;

/// Pulse backend picked at runtime.
enum SimPulse {
    Pca9685(Pca9685PulseController<SimBus>),
    Null(NullPulseController),
}

impl SimPulse {
    fn from_config(
        config: &ControllerConfig,
        bus: &'static Mutex<SimI2c>,
    ) -> Result<Self, ActuatorError> {
        match config {
            ControllerConfig::Null => Ok(SimPulse::Null(NullPulseController::new())),
            other => Ok(SimPulse::Pca9685(Pca9685PulseController::from_config(
                other,
                MutexDevice::new(bus),
            )?)),
        }
    }
}

impl PulseController for SimPulse {
    fn set_pulse(
        &mut self,
        pulse: i32,
    ) -> Result<(), ActuatorError> {
        match self {
            SimPulse::Pca9685(c) => c.set_pulse(pulse),
            SimPulse::Null(c) => c.set_pulse(pulse),
        }
    }

    fn pulse(&self) -> Option<i32> {
        match self {
            SimPulse::Pca9685(c) => c.pulse(),
            SimPulse::Null(c) => c.pulse(),
        }
    }
}

static I2C_BUS: StaticCell<Mutex<SimI2c>> = StaticCell::new();

fn build_mixer(
    opts: &Opts,
    cfg: &VehicleConfig,
    bus: &'static Mutex<SimI2c>,
) -> Result<Box<dyn ActuatorMixer>, ActuatorError> {
    match &cfg.mixer {
        MixerConfig::Ackermann { steering, throttle } => {
            let mixer = AckermannMixer::from_controllers(
                SimPulse::from_config(&steering.controller, bus)?,
                steering.calibration,
                SimPulse::from_config(&throttle.controller, bus)?,
                throttle.calibration,
                &mut StdDelay,
                cfg.settle_ms,
            )?;
            Ok(Box::new(mixer))
        }
        MixerConfig::Differential { left, right } => {
            let drv8835 = Arc::new(SharedBus::new(SimDrv8835::new(
                SimPwm("m1_pwm"),
                SimPin("m1_dir"),
                SimPwm("m2_pwm"),
                SimPin("m2_dir"),
            )));
            let mut left: SpeedController<SimBus, SimDrv8835> =
                SpeedController::from_config(left, MutexDevice::new(bus), Some(&drv8835))?;
            let mut right: SpeedController<SimBus, SimDrv8835> =
                SpeedController::from_config(right, MutexDevice::new(bus), Some(&drv8835))?;
            if opts.sweep {
                info!("sweeping left motor");
                sweep(&mut left, &mut StdDelay, 500)?;
                info!("sweeping right motor");
                sweep(&mut right, &mut StdDelay, 500)?;
            }
            Ok(Box::new(DifferentialDriveMixer::new(left, right)))
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SimError {
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    #[error("cannot install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// Both handlers are installed before this returns, so a signal that lands
/// during ESC calibration still stops the loop instead of killing the process.
fn stop_signal() -> Result<impl Future<Output = ()>, std::io::Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("SIGINT received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
    })
}

/// Tick the mixer every `period` until `ticks` have run or `stop` resolves.
/// Returns how many ticks ran.
async fn drive_loop<M, S>(
    mixer: &mut M,
    steering: f32,
    throttle: f32,
    ticks: u32,
    period: Duration,
    stop: S,
) -> Result<u32, ActuatorError>
where
    M: ActuatorMixer + ?Sized,
    S: Future<Output = ()>,
{
    tokio::pin!(stop);
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    let mut done = 0;
    while done < ticks {
        tokio::select! {
            biased;
            _ = &mut stop => {
                info!(tick = done, "stop requested");
                break;
            }
            _ = interval.tick() => {
                mixer.update(steering, throttle)?;
                debug!(tick = done, "tick");
                done += 1;
            }
        }
    }
    Ok(done)
}

async fn run(opts: &Opts) -> Result<(), SimError> {
    let stop = stop_signal()?;
    let cfg = match &opts.config {
        Some(path) => VehicleConfig::from_file(path)?,
        None => VehicleConfig::default(),
    };
    info!(mixer = ?cfg.mixer, "vehicle config");

    let bus = I2C_BUS.init(Mutex::new(SimI2c));
    let mut mixer = build_mixer(opts, &cfg, bus)?;

    info!(ticks = opts.ticks, "starting drive loop");
    let done = drive_loop(
        mixer.as_mut(),
        opts.steering,
        opts.throttle,
        opts.ticks,
        Duration::from_millis(cfg.drive_loop_delay_ms),
        stop,
    )
    .await?;
    info!(ticks = done, "drive loop finished, releasing actuators");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts: Opts = Opts::parse();
    if let Err(e) = run(&opts).await {
        error!("sim-car stopped: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drive_core::utils::controllers::{Drv8835Channel, Drv8835Controller, DualMotorDriver};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(i16, i16)>>>);

    impl DualMotorDriver for Recorder {
        fn max_speed(&self) -> i16 {
            480
        }

        fn set_speeds(
            &mut self,
            m1: i16,
            m2: i16,
        ) -> Result<(), ActuatorError> {
            self.0.lock().unwrap().push((m1, m2));
            Ok(())
        }
    }

    fn car(log: &Recorder) -> (
        DifferentialDriveMixer<Drv8835Controller<Recorder>, Drv8835Controller<Recorder>>,
        Arc<SharedBus<Recorder>>,
    ) {
        let shared = Arc::new(SharedBus::new(log.clone()));
        let left = Drv8835Controller::new(shared.clone(), Drv8835Channel::M2).unwrap();
        let right = Drv8835Controller::new(shared.clone(), Drv8835Channel::M1).unwrap();
        (DifferentialDriveMixer::new(left, right), shared)
    }

    #[tokio::test]
    async fn test_stop_ends_loop_and_forces_off() {
        let log = Recorder::default();
        let (mut mixer, shared) = car(&log);

        let stop = tokio::time::sleep(Duration::from_millis(30));
        let done = drive_loop(&mut mixer, 0.0, 0.5, 100_000, Duration::from_millis(1), stop)
            .await
            .unwrap();
        assert!(done > 0 && done < 100_000, "ran {done} ticks");
        assert_eq!(shared.speeds(), [240, 240]);

        drop(mixer);
        assert_eq!(shared.speeds(), [0, 0]);
        assert_eq!(log.0.lock().unwrap().last(), Some(&(0, 0)));
    }

    #[tokio::test]
    async fn test_pending_stop_runs_every_tick() {
        let log = Recorder::default();
        let (mut mixer, _shared) = car(&log);
        let done = drive_loop(
            &mut mixer,
            0.3,
            0.3,
            5,
            Duration::from_millis(1),
            std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(done, 5);
        assert_eq!(mixer.wheels(), (0.6, 0.0));
    }

    #[tokio::test]
    async fn test_ready_stop_runs_nothing() {
        let log = Recorder::default();
        let (mut mixer, shared) = car(&log);
        let done = drive_loop(
            &mut mixer,
            0.0,
            1.0,
            10,
            Duration::from_millis(1),
            std::future::ready(()),
        )
        .await
        .unwrap();
        assert_eq!(done, 0);
        assert_eq!(shared.speeds(), [0, 0]);
    }
}
