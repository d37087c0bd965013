use core::cell::RefCell;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use drive_core::utils::{
    actuators::{PulseRange, PwmSteering, PwmThrottle, SteeringCalibration},
    config::{MixerConfig, VehicleConfig},
    controllers::{
        ActuatorError, ControllerConfig, Drv8835Channel, Drv8835Controller, DualMotorDriver,
        MotorHatController, Pca9685PulseController, SharedBus, SpeedController,
    },
    ActuatorMixer, DifferentialDriveMixer, Motor, PulseController,
};
use embedded_hal::{
    delay::DelayNs,
    i2c::{ErrorKind, ErrorType, I2c, Operation},
};
use embedded_hal_bus::i2c::{MutexDevice, RefCellDevice};
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};

/// Default I2C address for the servo/ESC PWM board.
pub const PWM_ADDRESS: u8 = 0x40;
/// Default I2C address for the Motor HAT.
pub const HAT_ADDRESS: u8 = 0x60;

/// Create a write transaction for the given I2C address and data payload.
pub fn write(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write(addr, data)
}

/// Enable plus 60 Hz prescale, as issued by every pulse controller.
fn configure_60hz() -> Vec<I2cTrans> {
    vec![
        write(PWM_ADDRESS, vec![0x00, 0x01]),
        write(PWM_ADDRESS, vec![0x00, 0x11]),
        write(PWM_ADDRESS, vec![0xFE, 101]),
        write(PWM_ADDRESS, vec![0x00, 0x01]),
    ]
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(
        &mut self,
        _ns: u32,
    ) {
    }
}

/// PCA9685 register file behind an `I2c` implementation.
struct FakePca {
    regs: Vec<u8>,
    writes: usize,
}

impl FakePca {
    fn new() -> Self {
        FakePca {
            regs: vec![0; 256],
            writes: 0,
        }
    }

    fn word(
        &self,
        reg: usize,
    ) -> u16 {
        u16::from(self.regs[reg]) | (u16::from(self.regs[reg + 1]) << 8)
    }

    fn on(
        &self,
        ch: usize,
    ) -> u16 {
        self.word(0x06 + 4 * ch)
    }

    fn off(
        &self,
        ch: usize,
    ) -> u16 {
        self.word(0x08 + 4 * ch)
    }

    fn pin_high(
        &self,
        ch: usize,
    ) -> bool {
        self.on(ch) & 0x1000 != 0 && self.off(ch) & 0x1000 == 0
    }

    fn pin_low(
        &self,
        ch: usize,
    ) -> bool {
        self.off(ch) & 0x1000 != 0
    }

    fn duty(
        &self,
        ch: usize,
    ) -> u16 {
        self.off(ch) & 0x0FFF
    }
}

impl ErrorType for FakePca {
    type Error = core::convert::Infallible;
}

impl I2c for FakePca {
    fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut ptr = 0usize;
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    if let Some((reg, data)) = bytes.split_first() {
                        ptr = usize::from(*reg);
                        for b in data {
                            self.regs[ptr & 0xFF] = *b;
                            ptr += 1;
                        }
                        self.writes += 1;
                    }
                }
                Operation::Read(buf) => {
                    for b in buf.iter_mut() {
                        *b = self.regs[ptr & 0xFF];
                        ptr += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `FakePca` that can be switched to refuse every transaction.
struct FlakyPca {
    chip: FakePca,
    failing: bool,
    attempts: usize,
}

impl FlakyPca {
    fn new() -> Self {
        FlakyPca {
            chip: FakePca::new(),
            failing: false,
            attempts: 0,
        }
    }
}

impl ErrorType for FlakyPca {
    type Error = ErrorKind;
}

impl I2c for FlakyPca {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.attempts += 1;
        if self.failing {
            return Err(ErrorKind::Other);
        }
        self.chip
            .transaction(address, operations)
            .map_err(|never| match never {})
    }
}

#[test]
fn test_steering_pulses_on_the_wire() {
    let mut expectations = configure_60hz();
    expectations.extend([
        // auto-increment, then channel 1 ON=0 OFF=390
        write(PWM_ADDRESS, vec![0x00, 0x21]),
        write(PWM_ADDRESS, vec![0x0A, 0x00, 0x00, 0x86, 0x01]),
        // OFF=290, OFF=490
        write(PWM_ADDRESS, vec![0x0A, 0x00, 0x00, 0x22, 0x01]),
        write(PWM_ADDRESS, vec![0x0A, 0x00, 0x00, 0xEA, 0x01]),
        // forced off
        write(PWM_ADDRESS, vec![0x0A, 0x00, 0x00, 0x00, 0x00]),
    ]);

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let ctrl = Pca9685PulseController::new(RefCellDevice::new(&i2c_bus), PWM_ADDRESS, 1, 60).unwrap();
    let mut steering = PwmSteering::new(ctrl, SteeringCalibration::default()).unwrap();

    steering.update(0.0).unwrap();
    assert_eq!(steering.pulse(), Some(390));
    steering.update(-1.0).unwrap();
    assert_eq!(steering.pulse(), Some(290));
    steering.update(1.0).unwrap();
    assert_eq!(steering.pulse(), Some(490));

    let mut ctrl = steering.into_controller();
    ctrl.shutdown();
    ctrl.shutdown();
    assert!(ctrl.shutdown_error().is_none());
    drop(ctrl);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_throttle_calibrates_before_first_update() {
    let mut expectations = configure_60hz();
    expectations.extend([
        write(PWM_ADDRESS, vec![0x00, 0x21]),
        // calibration: neutral 350
        write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x5E, 0x01]),
        // full forward 300
        write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x2C, 0x01]),
        // full reverse 490
        write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0xEA, 0x01]),
        write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x00, 0x00]),
    ]);

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let ctrl = Pca9685PulseController::new(RefCellDevice::new(&i2c_bus), PWM_ADDRESS, 0, 60).unwrap();
    let mut throttle = PwmThrottle::new(ctrl, PulseRange::default(), &mut NoDelay, 1000).unwrap();
    assert_eq!(throttle.pulse(), Some(350));

    throttle.update(1.0).unwrap();
    throttle.update(-1.0).unwrap();
    assert_eq!(throttle.pulse(), Some(490));

    throttle.into_controller().shutdown();
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_pulse_outside_hardware_range_is_refused() {
    let mut expectations = configure_60hz();
    expectations.extend([
        write(PWM_ADDRESS, vec![0x00, 0x21]),
        write(PWM_ADDRESS, vec![0x06, 0x00, 0x00, 0x00, 0x00]),
    ]);
    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut ctrl =
        Pca9685PulseController::new(RefCellDevice::new(&i2c_bus), PWM_ADDRESS, 0, 60).unwrap();

    assert!(matches!(
        ctrl.set_pulse(5000),
        Err(ActuatorError::Range { .. })
    ));
    assert!(ctrl.set_pulse(-1).is_err());
    assert_eq!(ctrl.pulse(), None);

    ctrl.shutdown();
    assert_eq!(ctrl.pulse(), Some(0));
    drop(ctrl);
    i2c_bus.borrow_mut().done();
}

#[test]
fn test_motor_hat_turn_and_release() {
    let bus = Mutex::new(FakePca::new());
    let mut motor = MotorHatController::new(MutexDevice::new(&bus), HAT_ADDRESS, 1).unwrap();
    {
        let chip = bus.lock().unwrap();
        assert!(chip.pin_low(10) && chip.pin_low(9));
        assert_eq!(chip.duty(8), 0);
    }

    motor.turn(0.5).unwrap();
    assert_eq!(motor.native(), 127);
    {
        let chip = bus.lock().unwrap();
        assert!(chip.pin_high(10));
        assert!(chip.pin_low(9));
        assert_eq!(chip.duty(8), 127 * 16);
    }

    motor.turn(-1.0).unwrap();
    assert_eq!(motor.speed(), -1.0);
    {
        let chip = bus.lock().unwrap();
        assert!(chip.pin_low(10));
        assert!(chip.pin_high(9));
        assert_eq!(chip.duty(8), 255 * 16);
    }

    assert!(matches!(
        motor.turn(1.2),
        Err(ActuatorError::Range { .. })
    ));
    assert_eq!(motor.speed(), -1.0);

    motor.shutdown();
    let writes = bus.lock().unwrap().writes;
    motor.shutdown();
    drop(motor);
    let chip = bus.lock().unwrap();
    assert_eq!(chip.writes, writes);
    assert!(chip.pin_low(10) && chip.pin_low(9));
    assert_eq!(chip.duty(8), 0);
}

#[test]
fn test_motor_hat_reverse_matches_forward() {
    let bus = Mutex::new(FakePca::new());
    let mut motor = MotorHatController::new(MutexDevice::new(&bus), HAT_ADDRESS, 1).unwrap();

    for (speed, native) in [(0.3, 76), (0.5, 127), (0.7, 178), (1.0, 255)] {
        motor.turn(speed).unwrap();
        assert_eq!(motor.native(), native);
        motor.turn(-speed).unwrap();
        assert_eq!(motor.native(), -native, "speed {}", -speed);
        assert_eq!(motor.native_speed(), Some(-native));
        assert_eq!(bus.lock().unwrap().duty(8), native as u16 * 16);
    }
}

#[test]
fn test_pulse_shutdown_failure_is_recorded() {
    let bus = Mutex::new(FlakyPca::new());
    let mut ctrl =
        Pca9685PulseController::new(MutexDevice::new(&bus), PWM_ADDRESS, 0, 60).unwrap();
    ctrl.set_pulse(350).unwrap();
    bus.lock().unwrap().failing = true;

    ctrl.shutdown();
    assert!(matches!(
        ctrl.shutdown_error(),
        Some(ActuatorError::HardwareIo(_))
    ));
    assert_eq!(ctrl.pulse(), Some(350));
    assert!(matches!(ctrl.set_pulse(360), Err(ActuatorError::Released)));

    let attempts = bus.lock().unwrap().attempts;
    ctrl.shutdown();
    drop(ctrl);
    assert_eq!(bus.lock().unwrap().attempts, attempts);
}

#[test]
fn test_motor_hat_shutdown_failure_is_recorded() {
    let bus = Mutex::new(FlakyPca::new());
    let mut motor = MotorHatController::new(MutexDevice::new(&bus), HAT_ADDRESS, 2).unwrap();
    motor.turn(0.5).unwrap();
    bus.lock().unwrap().failing = true;

    motor.shutdown();
    assert!(matches!(
        motor.shutdown_error(),
        Some(ActuatorError::HardwareIo(_))
    ));

    let attempts = bus.lock().unwrap().attempts;
    motor.shutdown();
    drop(motor);
    assert_eq!(bus.lock().unwrap().attempts, attempts);
}

#[test]
fn test_motor_hat_motors_are_independent() {
    let bus = Mutex::new(FakePca::new());
    let mut m1 = MotorHatController::new(MutexDevice::new(&bus), HAT_ADDRESS, 1).unwrap();
    let mut m2 = MotorHatController::new(MutexDevice::new(&bus), HAT_ADDRESS, 2).unwrap();

    m1.turn(1.0).unwrap();
    m2.turn(1.0).unwrap();
    m1.shutdown();

    let chip = bus.lock().unwrap();
    assert_eq!(chip.duty(8), 0);
    // motor 2 runs on pwm channel 13 with in1 on 11
    assert_eq!(chip.duty(13), 255 * 16);
    assert!(chip.pin_high(11));
    drop(chip);
    assert_eq!(m2.speed(), 1.0);
}

#[test]
fn test_motor_hat_rejects_unknown_motor() {
    let bus = Mutex::new(FakePca::new());
    for motor in [0, 5] {
        assert!(matches!(
            MotorHatController::new(MutexDevice::new(&bus), HAT_ADDRESS, motor),
            Err(ActuatorError::Configuration(_))
        ));
    }
}

/// Dual driver that logs every pair it is asked to write.
#[derive(Clone, Default)]
struct PairLog(Arc<Mutex<Vec<(i16, i16)>>>);

impl PairLog {
    fn pairs(&self) -> Vec<(i16, i16)> {
        self.0.lock().unwrap().clone()
    }
}

impl DualMotorDriver for PairLog {
    fn max_speed(&self) -> i16 {
        480
    }

    fn set_speeds(
        &mut self,
        m1: i16,
        m2: i16,
    ) -> Result<(), ActuatorError> {
        let mut pairs = self.0.lock().unwrap();
        std::thread::yield_now();
        pairs.push((m1, m2));
        Ok(())
    }
}

/// Dual driver that accepts a fixed number of writes, then fails every one.
#[derive(Clone)]
struct WearingDriver {
    writes_left: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl WearingDriver {
    fn new(writes: usize) -> Self {
        WearingDriver {
            writes_left: Arc::new(AtomicUsize::new(writes)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl DualMotorDriver for WearingDriver {
    fn max_speed(&self) -> i16 {
        480
    }

    fn set_speeds(
        &mut self,
        _m1: i16,
        _m2: i16,
    ) -> Result<(), ActuatorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| ActuatorError::HardwareIo("driver fault".into()))
    }
}

#[test]
fn test_drv8835_shutdown_failure_is_recorded() {
    // one write for the forced-off at construction, one for the turn
    let driver = WearingDriver::new(2);
    let bus = Arc::new(SharedBus::new(driver.clone()));
    let mut motor = Drv8835Controller::new(bus.clone(), Drv8835Channel::M1).unwrap();
    motor.turn(0.5).unwrap();

    motor.shutdown();
    assert!(motor.is_released());
    assert!(matches!(
        motor.shutdown_error(),
        Some(ActuatorError::HardwareIo(_))
    ));
    // the chip is still running, and the shared state says so
    assert_eq!(bus.speeds(), [240, 0]);
    assert_eq!(motor.native(), 240);
    assert!(matches!(motor.turn(0.1), Err(ActuatorError::Released)));

    let attempts = driver.attempts();
    motor.shutdown();
    drop(motor);
    assert_eq!(driver.attempts(), attempts);
}

#[test]
fn test_concurrent_channels_never_tear() {
    let log = PairLog::default();
    let bus = Arc::new(SharedBus::new(log.clone()));
    let mut right = Drv8835Controller::new(bus.clone(), Drv8835Channel::M1).unwrap();
    let mut left = Drv8835Controller::new(bus.clone(), Drv8835Channel::M2).unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for k in 0..=50 {
                right.turn(-(k as f32) / 50.0).unwrap();
            }
        });
        s.spawn(|| {
            for k in 0..=50 {
                left.turn(k as f32 / 50.0).unwrap();
            }
        });
    });

    assert_eq!(bus.speeds(), [-480, 480]);
    let pairs = log.pairs();
    // each channel only ever moves one way, so any interleaving of whole
    // writes gives monotone columns
    for w in pairs.windows(2) {
        assert!(w[1].0 <= w[0].0, "m1 went back: {:?}", w);
        assert!(w[1].1 >= w[0].1, "m2 went back: {:?}", w);
    }
    assert_eq!(pairs.last(), Some(&(-480, 480)));
    // two forced-off writes at construction plus 51 per channel
    assert_eq!(pairs.len(), 2 + 2 * 51);

    drop(right);
    drop(left);
    assert_eq!(bus.speeds(), [0, 0]);
}

#[test]
fn test_drv8835_forced_off_is_idempotent() {
    let log = PairLog::default();
    let bus = Arc::new(SharedBus::new(log.clone()));
    let mut motor = Drv8835Controller::new(bus.clone(), Drv8835Channel::M1).unwrap();
    motor.turn(0.75).unwrap();
    assert_eq!(motor.native(), 360);

    motor.shutdown();
    let writes = log.pairs().len();
    assert_eq!(bus.speeds(), [0, 0]);
    assert_eq!(motor.speed(), 0.0);

    motor.shutdown();
    drop(motor);
    assert_eq!(log.pairs().len(), writes);
    assert_eq!(bus.speeds(), [0, 0]);
}

#[test]
fn test_speed_controller_from_config() {
    let bus = Mutex::new(FakePca::new());
    let shared = Arc::new(SharedBus::new(PairLog::default()));

    let mut null = SpeedController::from_config(
        &ControllerConfig::Null,
        MutexDevice::new(&bus),
        Some(&shared),
    )
    .unwrap();
    null.turn(0.3).unwrap();
    assert_eq!(null.speed(), 0.3);

    let hat = SpeedController::from_config(
        &ControllerConfig::MotorHat {
            motor: 3,
            address: HAT_ADDRESS,
        },
        MutexDevice::new(&bus),
        Some(&shared),
    );
    assert!(matches!(hat, Ok(SpeedController::MotorHat(_))));

    let orphan = SpeedController::from_config(
        &ControllerConfig::Drv8835 {
            channel: Drv8835Channel::M1,
        },
        MutexDevice::new(&bus),
        None::<&Arc<SharedBus<PairLog>>>,
    );
    assert!(matches!(orphan, Err(ActuatorError::Configuration(_))));

    let servo = SpeedController::from_config(
        &ControllerConfig::Pca9685 {
            channel: 0,
            address: PWM_ADDRESS,
            frequency: 60,
        },
        MutexDevice::new(&bus),
        Some(&shared),
    );
    assert!(servo.is_err());
}

#[test]
fn test_differential_car_from_default_config() {
    let cfg = VehicleConfig::default();
    let (left_cfg, right_cfg) = match cfg.mixer {
        MixerConfig::Differential { left, right } => (left, right),
        other => panic!("unexpected mixer {other:?}"),
    };

    let bus = Mutex::new(FakePca::new());
    let shared = Arc::new(SharedBus::new(PairLog::default()));
    let left =
        SpeedController::from_config(&left_cfg, MutexDevice::new(&bus), Some(&shared)).unwrap();
    let right =
        SpeedController::from_config(&right_cfg, MutexDevice::new(&bus), Some(&shared)).unwrap();
    let mut car = DifferentialDriveMixer::new(left, right);

    // hard right at half throttle: left wheel saturates, right wheel stops
    car.update(0.5, 0.5).unwrap();
    assert_eq!(car.wheels(), (1.0, 0.0));
    // left is M2, right is M1
    assert_eq!(shared.speeds(), [0, 480]);

    car.update(0.0, -0.5).unwrap();
    assert_eq!(shared.speeds(), [-240, -240]);

    drop(car);
    assert_eq!(shared.speeds(), [0, 0]);
}
