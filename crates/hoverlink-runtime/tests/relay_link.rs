//! End-to-end runs over simulated links: a relay node bridging the serial
//! controller and a radio peer, and a wired node driving the hoverboard
//! double.

use std::sync::Arc;

use hoverlink_hal::sim::{SimWiredLink, SimWirelessLink};
use hoverlink_hal::wired;
use hoverlink_middleware::frame::{self, FrameParser};
use hoverlink_middleware::{DiagnosticBus, Diagnostics, LinkEvent, SimHoverboard, Topic};
use hoverlink_middleware::{DiagnosticPayload, ProtocolEndpoint};
use hoverlink_runtime::{
    CommunicationConfig, LinkPlan, ManualClock, MotorCommand, Transports, setup_with_clock,
};
use hoverlink_types::{BuzzerCommand, Command, HallSample, ParamCode, PeerAddress, ProtocolMessage};

const REMOTE: PeerAddress = PeerAddress([0x24, 0x0a, 0xc4, 0x11, 0x22, 0x33]);

fn decode(bytes: impl IntoIterator<Item = u8>) -> Vec<ProtocolMessage> {
    let mut parser = FrameParser::new();
    bytes
        .into_iter()
        .filter_map(|b| parser.push(b))
        .filter_map(Result::ok)
        .collect()
}

#[test]
fn relay_bridges_serial_and_radio() {
    let uart = SimWiredLink::new("uart");
    let radio = SimWirelessLink::new("radio");
    radio.add_visible_peer(REMOTE);
    let bus = DiagnosticBus::default();
    let mut link_events = bus.subscribe_to(Topic::Link);

    let config = CommunicationConfig {
        plan: LinkPlan::Relay,
        ..CommunicationConfig::default()
    };
    let mut comm = setup_with_clock(
        &config,
        Transports {
            wired: Some(wired::shared(uart.clone())),
            wireless: Some(Arc::new(radio.clone())),
            console: None,
        },
        Diagnostics::disabled().with_bus(bus),
        Arc::new(ManualClock::new()),
    )
    .expect("relay setup");

    // A relay node schedules nothing and sends nothing on its own.
    comm.scheduler.run_cycle();
    assert!(uart.take_written().is_empty());
    assert_eq!(radio.scan_count(), 0);

    // Controller traffic while unpaired triggers the scan that pairs.
    let hall = HallSample {
        wheel_speed_mm_s: [100, 100],
    };
    let hall_frame = frame::encode(&ProtocolMessage::new(
        Command::ReadResponse,
        ParamCode::SENS_HALL,
        hall.encode(),
    ));
    uart.feed(&hall_frame);
    comm.scheduler.run_cycle();
    assert_eq!(radio.scan_count(), 1);
    assert!(radio.take_sent().is_empty());
    assert_eq!(comm.registry.as_ref().unwrap().lock().active_peer(), Some(REMOTE));

    // Once paired the next frame is forwarded exactly once.
    uart.feed(&hall_frame);
    comm.scheduler.run_cycle();
    let sent = radio.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, REMOTE);
    let forwarded = decode(sent[0].1.clone());
    assert_eq!(forwarded[0].code, ParamCode::SENS_HALL);
    assert_eq!(forwarded[0].payload, hall.encode());
    assert!(uart.take_written().is_empty(), "nothing reflected to the controller");

    // The remote's command goes the other way.
    assert!(radio.is_discoverable());
    let buzz = frame::encode(&ProtocolMessage::write(
        ParamCode::SET_BUZZER,
        BuzzerCommand::new(440, 1, 100).encode(),
    ));
    radio.deliver(REMOTE, &buzz);
    assert!(!radio.is_discoverable(), "first valid frame hides the node");
    comm.scheduler.run_cycle();

    let to_controller = decode(uart.take_written().into_iter().flatten());
    assert_eq!(to_controller.len(), 1);
    assert_eq!(to_controller[0].cmd, Command::Write);
    assert_eq!(
        BuzzerCommand::decode(&to_controller[0].payload),
        Some(BuzzerCommand::new(440, 1, 100))
    );
    assert!(radio.take_sent().is_empty());

    // Strangers are ignored.
    radio.deliver(PeerAddress([1, 2, 3, 4, 5, 6]), &buzz);
    comm.scheduler.run_cycle();
    assert!(uart.take_written().is_empty());

    let mut events = Vec::new();
    while let Some(event) = link_events.try_recv() {
        if let DiagnosticPayload::Link(e) = event.payload {
            events.push(e);
        }
    }
    assert_eq!(events, vec![LinkEvent::PeerPaired(REMOTE), LinkEvent::BroadcastHidden]);
}

#[test]
fn wired_node_drives_the_hoverboard() {
    let uart = SimWiredLink::new("uart");
    let mut board = SimHoverboard::new(uart.clone());

    let mut comm = setup_with_clock(
        &CommunicationConfig::default(),
        Transports {
            wired: Some(wired::shared(uart.clone())),
            wireless: None,
            console: None,
        },
        Diagnostics::disabled(),
        Arc::new(ManualClock::new()),
    )
    .expect("wired setup");

    board.step();
    assert!(board.enabled());

    comm.motor.set_command(MotorCommand { pwm: 200, steer: 0 });
    comm.handle.set_buzzer(BuzzerCommand::new(440, 1, 100));
    for _ in 0..4 {
        comm.scheduler.run_cycle();
        board.step();
    }

    assert_eq!(board.setpoint().pwm, [200, 200]);
    assert_eq!(board.last_buzzer(), Some(BuzzerCommand::new(440, 1, 100)));

    let measured = comm.motor.measured();
    let expected = HallSample {
        wheel_speed_mm_s: [400, 400],
    }
    .speed_kmh();
    assert!((measured.speed_kmh - expected).abs() < 1e-4);

    let endpoint = comm.wired_endpoint.as_ref().unwrap().lock();
    assert!(endpoint.battery_voltage() > 30.0);
}
