mod common;

use common::*;
use flexcan::bus::{
    Acknowledge, CanBus, CanConfigurable, ConfigurationError, ControllerState, Error,
};
use flexcan::config::{BitTiming, BitTimingConfig, BitTimingError, CanConfig, ClockSource, Mode};
use flexcan::embedded_can::StandardId;
use flexcan::filter::Mask;
use flexcan::messageram::PayloadSize;
use flexcan::reg;
use fugit::RateExtU32 as _;

const MCR_MDIS: u32 = 1 << 31;
const MCR_FRZACK: u32 = 1 << 24;
const MCR_LPMACK: u32 = 1 << 20;
const MCR_SRXDIS: u32 = 1 << 17;
const MCR_IRMQ: u32 = 1 << 16;
const MCR_AEN: u32 = 1 << 12;
const MCR_FDEN: u32 = 1 << 11;
const CTRL1_CLKSRC: u32 = 1 << 13;

fn fd_config(payload: PayloadSize) -> CanConfig {
    let mut config = CanConfig::new(500.kHz());
    config.mode = Mode::Fd {
        allow_bit_rate_switching: true,
        data_phase_timing: BitTiming::new(2.MHz()),
        transceiver_delay_compensation: Some(16),
    };
    config.payload = payload;
    config
}

fn quick_timeout() -> CanConfig {
    let mut config = CanConfig::new(500.kHz());
    config.timeout_iterations = 10;
    config
}

#[test]
fn construction_freezes_and_clears_message_buffers() {
    let sim = SimController::new();
    let can = configurable(&sim, CanConfig::new(500.kHz()));

    assert_eq!(can.state(), ControllerState::FreezeConfig);
    for word in 0..RAM_WORDS {
        assert_eq!(sim.word(reg::RAM + 4 * word), 0, "word {word}");
    }
    for index in 0..32 {
        assert_eq!(sim.word(reg::rximr(index)), 0);
    }
    assert_eq!(sim.word(reg::IMASK1), 0);
    assert_eq!(sim.writes_to(reg::IFLAG1), [u32::MAX]);
}

#[test]
fn clock_source_is_selected_while_disabled() {
    let sim = SimController::new();
    let _can = configurable(&sim, CanConfig::new(500.kHz()));

    let log = sim.log();
    let clock_select = log
        .iter()
        .position(|a| matches!(a, Access::Write(reg::CTRL1, v) if v & CTRL1_CLKSRC != 0))
        .unwrap();
    let last_mcr_before = log[..clock_select]
        .iter()
        .rev()
        .find_map(|a| match a {
            Access::Write(reg::MCR, v) => Some(*v),
            _ => None,
        })
        .unwrap();
    assert_ne!(last_mcr_before & MCR_MDIS, 0);
    assert_ne!(sim.word(reg::MCR) & MCR_MDIS, MCR_MDIS);
}

#[test]
fn oscillator_clock_leaves_clksrc_clear() {
    let sim = SimController::new();
    let deps = Deps {
        clock: 8.MHz(),
        source: ClockSource::Oscillator,
    };
    let _can = SimConfigurable::with_registers(&sim, CanConfig::new(500.kHz()), deps)
        .unwrap();
    assert_eq!(sim.word(reg::CTRL1) & CTRL1_CLKSRC, 0);
}

#[test]
fn classic_finalize_commits_configuration() {
    let sim = SimController::new();
    let deps = Deps {
        clock: 8.MHz(),
        source: ClockSource::Peripheral,
    };
    let mut can =
        SimConfigurable::with_registers(&sim, CanConfig::new(500.kHz()), deps)
            .unwrap();
    can.buffers().receive(0, StandardId::new(0x511).unwrap()).unwrap();
    can.buffers().transmit(1).unwrap();
    let can = can.finalize().unwrap();

    assert_eq!(can.state(), ControllerState::NormalOperation);
    // 8 MHz / 500 kbit/s: 16 quanta, propagation 9, phase segments 3
    assert_eq!(sim.word(reg::CBT), 0x8002_2042);
    let mcr = sim.word(reg::MCR);
    assert_eq!(mcr & 0x7F, 31);
    assert_eq!(mcr & (MCR_IRMQ | MCR_AEN), MCR_IRMQ | MCR_AEN);
    assert_eq!(mcr & (MCR_FDEN | MCR_SRXDIS), 0);
    assert_eq!(sim.word(reg::FDCTRL), 0);

    assert_eq!(sim.word(reg::RAM), 0x0400_0000);
    assert_eq!(sim.word(reg::RAM + 4), 0x1444_0000);
    assert_eq!(sim.word(reg::RAM + 16), 0x0800_0000);
    assert_eq!(sim.word(reg::RXMGMASK), 0x1FFF_FFFF);
    assert_eq!(sim.word(reg::rximr(0)), 0x1FFF_FFFF);
}

#[test]
fn cbt_matches_calculated_timing() {
    let sim = SimController::new();
    let _can = configurable(&sim, CanConfig::new(500.kHz())).finalize().unwrap();

    let t = BitTimingConfig::nominal(40.MHz(), &BitTiming::new(500.kHz())).unwrap();
    let expected = 1u32 << 31
        | u32::from(t.prescaler) << 21
        | u32::from(t.resync_jump_width - 1) << 16
        | u32::from(t.propagation_segment - 1) << 10
        | u32::from(t.phase_segment_1 - 1) << 5
        | u32::from(t.phase_segment_2 - 1);
    assert_eq!(sim.word(reg::CBT), expected);
}

#[test]
fn fd_finalize_commits_data_phase() {
    let sim = SimController::new();
    let mut can = configurable(&sim, fd_config(PayloadSize::Bytes64));
    can.buffers().receive(0, StandardId::new(0x123).unwrap()).unwrap();
    can.buffers().transmit(1).unwrap();
    let _can = can.finalize().unwrap();

    assert_eq!(sim.word(reg::FDCTRL), 0x8003_9000);
    // 40 MHz / 2 Mbit/s: 20 quanta, propagation 11, phase segments 4
    assert_eq!(sim.word(reg::FDCBT), 0x0003_2C63);
    assert_ne!(sim.word(reg::CTRL2) & 1 << 12, 0);
    let mcr = sim.word(reg::MCR);
    assert_ne!(mcr & MCR_FDEN, 0);
    assert_eq!(mcr & 0x7F, 6);
    assert_eq!(sim.word(reg::RAM), 0xC400_0000);
    assert_eq!(sim.word(reg::RAM + 18 * 4), 0x0800_0000);
}

#[test]
fn second_ram_block_starts_on_its_boundary() {
    let sim = SimController::new();
    let mut can = CanConfigurable::<Can1, Deps, &SimController>::with_registers(
        &sim,
        fd_config(PayloadSize::Bytes64),
        Deps::default(),
    )
    .unwrap();
    can.buffers().receive(7, StandardId::new(0x123).unwrap()).unwrap();
    can.buffers().transmit(13).unwrap();
    let can = can.finalize().unwrap();

    assert_eq!(can.internals.layout().buffers(), 14);
    // Both regions hold 64 byte payloads
    assert_eq!(sim.word(reg::FDCTRL), 0x801B_9000);
    assert_eq!(sim.word(reg::MCR) & 0x7F, 13);
    assert_eq!(sim.word(reg::RAM + 4 * 128), 0xC400_0000);
    assert_eq!(sim.word(reg::RAM + 4 * 128 + 4), 0x123 << 18);
    assert_eq!(sim.word(reg::RAM + 4 * (128 + 6 * 18)), 0x0800_0000);
    assert_eq!(sim.word(reg::RAM + 4 * 7 * 18), 0);
}

#[test]
fn operating_flags_are_committed() {
    let sim = SimController::new();
    let mut config = CanConfig::new(500.kHz());
    config.loopback = true;
    config.listen_only = true;
    config.self_reception = false;
    config.triple_sampling = true;
    let _can = configurable(&sim, config).finalize().unwrap();

    let ctrl1 = sim.word(reg::CTRL1);
    assert_ne!(ctrl1 & 1 << 12, 0, "LPB");
    assert_ne!(ctrl1 & 1 << 3, 0, "LOM");
    assert_ne!(ctrl1 & 1 << 7, 0, "SMP");
    assert_ne!(sim.word(reg::MCR) & MCR_SRXDIS, 0);
}

#[test]
fn triple_sampling_is_dropped_in_fd_mode() {
    let sim = SimController::new();
    let mut config = fd_config(PayloadSize::Bytes8);
    config.triple_sampling = true;
    let _can = configurable(&sim, config).finalize().unwrap();
    assert_eq!(sim.word(reg::CTRL1) & 1 << 7, 0);
}

#[test]
fn masks_are_committed_per_buffer() {
    let sim = SimController::new();
    let mut can = configurable(&sim, CanConfig::new(500.kHz()));
    can.buffers().receive(0, StandardId::new(0x510).unwrap()).unwrap();
    can.buffers().receive(2, StandardId::new(0x100).unwrap()).unwrap();
    can.filters()
        .set(0, Mask::standard(StandardId::new(0x7F0).unwrap()))
        .unwrap();
    can.filters().set_global(Mask::ACCEPT_ALL);
    let _can = can.finalize().unwrap();

    assert_eq!(sim.word(reg::rximr(0)), 0x1FC0_0000);
    assert_eq!(sim.word(reg::rximr(2)), 0);
    assert_eq!(sim.word(reg::RXMGMASK), 0);
}

#[test]
fn rejected_configuration_touches_no_register() {
    let sim = SimController::new();
    let mut config = CanConfig::new(500.kHz());
    config.payload = PayloadSize::Bytes16;
    let can = configurable(&sim, config);
    sim.clear_log();

    let (error, mut can) = can.finalize().unwrap_err();
    assert_eq!(
        error,
        Error::Configuration(ConfigurationError::PayloadRequiresFd(PayloadSize::Bytes16))
    );
    assert!(sim.log().iter().all(|a| matches!(a, Access::Read(_))));
    assert_eq!(can.state(), ControllerState::FreezeConfig);

    can.config().payload = PayloadSize::Bytes8;
    assert!(can.finalize().is_ok());
}

#[test]
fn buffer_outside_layout_is_rejected() {
    let sim = SimController::new();
    let mut can = configurable(&sim, fd_config(PayloadSize::Bytes64));
    can.buffers().transmit(7).unwrap();
    let (error, _) = can.finalize().unwrap_err();
    assert_eq!(
        error,
        Error::Configuration(ConfigurationError::BufferOutOfRange {
            index: 7,
            available: 7
        })
    );
}

#[test]
fn mask_without_receive_buffer_is_rejected() {
    let sim = SimController::new();
    let mut can = configurable(&sim, CanConfig::new(500.kHz()));
    can.buffers().transmit(2).unwrap();
    can.filters().set(2, Mask::ACCEPT_ALL).unwrap();
    let (error, _) = can.finalize().unwrap_err();
    assert_eq!(
        error,
        Error::Configuration(ConfigurationError::MaskWithoutReceiveBuffer { index: 2 })
    );
}

#[test]
fn transceiver_delay_offset_is_limited() {
    let sim = SimController::new();
    let mut config = fd_config(PayloadSize::Bytes8);
    if let Mode::Fd {
        transceiver_delay_compensation,
        ..
    } = &mut config.mode
    {
        *transceiver_delay_compensation = Some(32);
    }
    let (error, _) = configurable(&sim, config).finalize().unwrap_err();
    assert_eq!(
        error,
        Error::Configuration(ConfigurationError::TransceiverDelayCompensationOutOfRange(32))
    );
}

#[test]
fn unreachable_bitrate_is_rejected() {
    let sim = SimController::new();
    let (error, _) = configurable(&sim, CanConfig::new(33_333.Hz()))
        .finalize()
        .unwrap_err();
    assert_eq!(
        error,
        Error::Configuration(ConfigurationError::NominalBitTiming(
            BitTimingError::NoExactSolution {
                can_clock: 40.MHz(),
                bitrate: 33_333.Hz(),
            }
        ))
    );
}

#[test]
fn unreachable_data_bitrate_is_rejected() {
    let sim = SimController::new();
    let mut config = fd_config(PayloadSize::Bytes8);
    config.mode = Mode::Fd {
        allow_bit_rate_switching: true,
        data_phase_timing: BitTiming::new(3_333_333.Hz()),
        transceiver_delay_compensation: None,
    };
    let (error, _) = configurable(&sim, config).finalize().unwrap_err();
    assert!(matches!(
        error,
        Error::Configuration(ConfigurationError::DataBitTiming(_))
    ));
}

#[test]
fn missing_low_power_exit_times_out() {
    let sim = SimController::new();
    sim.stick(Some(Stuck::LowPower));
    let (error, _deps) =
        SimConfigurable::with_registers(&sim, quick_timeout(), Deps::default())
            .unwrap_err();
    assert_eq!(error, Error::HardwareTimeout(Acknowledge::LowPowerExit));
    assert!(sim.reads_of(reg::MCR) <= 10 + 4);
}

#[test]
fn missing_freeze_acknowledge_times_out() {
    let sim = SimController::new();
    // FRZACK is set out of reset, keep it clear instead
    sim.set_word(reg::MCR, sim.word(reg::MCR) & !MCR_FRZACK);
    sim.stick(Some(Stuck::Freeze));
    let (error, _deps) =
        SimConfigurable::with_registers(&sim, quick_timeout(), Deps::default())
            .unwrap_err();
    assert_eq!(error, Error::HardwareTimeout(Acknowledge::FreezeEntry));
}

#[test]
fn missing_freeze_exit_times_out() {
    let sim = SimController::new();
    let can = configurable(&sim, quick_timeout());
    sim.stick(Some(Stuck::Freeze));
    sim.clear_log();
    let (error, _) = can.finalize().unwrap_err();
    assert_eq!(error, Error::HardwareTimeout(Acknowledge::FreezeExit));
    assert!(sim.reads_of(reg::MCR) <= 10 + 4);
}

#[test]
fn missing_ready_times_out() {
    let sim = SimController::new();
    let can = configurable(&sim, quick_timeout());
    sim.stick(Some(Stuck::Ready));
    let (error, _) = can.finalize().unwrap_err();
    assert_eq!(error, Error::HardwareTimeout(Acknowledge::Ready));
}

#[test]
fn reconfigure_clears_buffers_and_keeps_roles() {
    let sim = SimController::new();
    let can = classic_bus(&sim);
    sim.deliver(&classic(standard(0x511), &[1, 2])).unwrap();

    let can = can.reconfigure().unwrap();
    assert_eq!(can.state(), ControllerState::FreezeConfig);
    assert_eq!(sim.word(reg::RAM), 0);
    assert_eq!(sim.word(reg::IFLAG1), 0);

    let can = can.finalize().unwrap();
    assert_eq!(can.state(), ControllerState::NormalOperation);
    assert_eq!(sim.word(reg::RAM), 0x0400_0000);
    assert_eq!(sim.word(reg::RAM + 16), 0x0800_0000);
}

#[test]
fn reconfigure_timeout_hands_back_the_bus() {
    let sim = SimController::new();
    let can = configurable(&sim, quick_timeout()).finalize().unwrap();
    sim.stick(Some(Stuck::Freeze));
    let (error, can) = can.reconfigure().unwrap_err();
    assert_eq!(error, Error::HardwareTimeout(Acknowledge::FreezeEntry));
    assert_eq!(can.state(), ControllerState::NormalOperation);
}

#[test]
fn release_disables_the_module() {
    let sim = SimController::new();
    let can = classic_bus(&sim);
    let deps = can.release();
    assert_eq!(deps.source, ClockSource::Peripheral);
    let mcr = sim.word(reg::MCR);
    assert_ne!(mcr & MCR_MDIS, 0);
    assert_ne!(mcr & MCR_LPMACK, 0);
}

#[test]
fn status_registers_are_decoded() {
    let sim = SimController::new();
    let can = classic_bus(&sim);
    sim.set_word(reg::ECR, 0x0102_0304);
    sim.set_word(reg::ESR1, 0x0000_0010);

    let counters = can.error_counters();
    assert_eq!(counters.transmit, 0x04);
    assert_eq!(counters.receive, 0x03);
    assert_eq!(counters.transmit_fast, 0x02);
    assert_eq!(counters.receive_fast, 0x01);
    assert_eq!(
        can.protocol_status().fault_confinement(),
        flexcan::bus::FaultConfinement::ErrorPassive
    );
}

#[test]
fn configuration_is_printable() {
    let sim = SimController::new();
    let mut can = configurable(&sim, fd_config(PayloadSize::Bytes32));
    can.buffers().transmit(1).unwrap();

    let text = format!("{:?}", can.config());
    assert!(text.contains("Fd {"), "{text}");
    assert!(text.contains("transceiver_delay_compensation: Some(16)"), "{text}");
    assert!(text.contains("payload: Bytes32"), "{text}");
    assert!(text.contains("timeout_iterations: 100000"), "{text}");
    assert_eq!(format!("{:?}", can.buffers().role(1)), "Some(Transmit)");
}
