//! Tests for the stdio command and event transport

use blelink_cli::stdio::{read_commands, write_events};
use blelink_core::{Command, DeviceId, Event, GattStatus};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_commands_are_forwarded_in_order() {
    let input = concat!(
        r#"{"command":"Initialize","asCentral":true,"asPeripheral":false}"#,
        "\n\n",
        r#"{"command":"ConnectToPeripheral","name":"AA:BB"}"#,
        "\n",
        r#"{"command":"StopScan"}"#,
        "\n",
    );
    let (sender, mut receiver) = mpsc::channel(8);

    let forwarded = read_commands(input.as_bytes(), sender).await.unwrap();
    assert_eq!(forwarded, 3);

    assert_eq!(
        receiver.recv().await,
        Some(Command::Initialize {
            as_central: true,
            as_peripheral: false
        })
    );
    assert_eq!(
        receiver.recv().await,
        Some(Command::ConnectToPeripheral {
            name: "AA:BB".into()
        })
    );
    assert_eq!(receiver.recv().await, Some(Command::StopScan));
    assert_eq!(receiver.recv().await, None);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let input = concat!(
        "not json\n",
        r#"{"command":"Teleport"}"#,
        "\n",
        r#"{"command":"DisconnectAll"}"#,
        "\n",
    );
    let (sender, mut receiver) = mpsc::channel(8);

    let forwarded = read_commands(input.as_bytes(), sender).await.unwrap();
    assert_eq!(forwarded, 1);
    assert_eq!(receiver.recv().await, Some(Command::DisconnectAll));
}

#[tokio::test]
async fn test_reading_stops_when_engine_goes_away() {
    let input = concat!(
        r#"{"command":"StopScan"}"#,
        "\n",
        r#"{"command":"StopScan"}"#,
        "\n",
    );
    let (sender, receiver) = mpsc::channel(8);
    drop(receiver);

    let forwarded = read_commands(input.as_bytes(), sender).await.unwrap();
    assert_eq!(forwarded, 0);
}

#[tokio::test]
async fn test_events_are_written_one_per_line() {
    let (sender, receiver) = mpsc::unbounded_channel();
    sender.send(Event::Initialized).unwrap();
    sender
        .send(Event::DisconnectedPeripheral {
            device: DeviceId::from("AA:BB"),
        })
        .unwrap();
    sender
        .send(Event::Error {
            status: GattStatus::Timeout,
        })
        .unwrap();
    drop(sender);

    let mut output = Vec::new();
    let written = write_events(&mut output, receiver).await.unwrap();
    assert_eq!(written, 3);
    assert_eq!(
        String::from_utf8(output).unwrap(),
        "Initialized\nDisconnectedPeripheral~AA:BB\nError~Timeout\n"
    );
}
