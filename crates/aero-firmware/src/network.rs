//! WiFi, SNTP and MQTT behind [`NetworkLink`].
//!
//! The radio is not initialised until the first `connect_wifi`, so boots that
//! only count down a quiet-hours chunk never power it.

use alloc::vec;

use aero_core::network::sntp::{self, NTP_PACKET_LEN, NTP_PORT};
use aero_core::network::{NetworkError, NetworkLink};
use embassy_executor::Spawner;
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Runner, Stack, StackResources};
use embassy_time::{Duration, Instant, with_timeout};
use embedded_io_async::{ErrorType, Read, Write};
use esp_hal::peripherals::WIFI;
use esp_radio::Controller;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice};
use log::{debug, error, info, warn};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig as MqttConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;
use static_cell::StaticCell;

use crate::wifi_secrets::{
    DEVICE_ID, MQTT_HOST, MQTT_PASSWORD, MQTT_TOPIC, MQTT_USERNAME, NTP_HOST, WIFI_PASSWORD,
    WIFI_SSID, mqtt_port,
};

const TCP_BUFFER_LEN: usize = 1024;
const MQTT_BUFFER_LEN: usize = 256;
const MQTT_KEEP_ALIVE_SECS: u16 = 60;
const MQTT_MAX_PROPERTIES: usize = 5;

/// Covers the PUBACK round trip.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
/// MQTT disconnect plus WiFi disconnect and stop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type Session = MqttClient<'static, MqttTransport, MQTT_MAX_PROPERTIES, CountingRng>;

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Adapts an embassy-net TCP socket to the `embedded-io-async` traits rust-mqtt
/// expects.
pub struct MqttTransport {
    socket: TcpSocket<'static>,
}

impl ErrorType for MqttTransport {
    type Error = embassy_net::tcp::Error;
}

impl Read for MqttTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await
    }
}

impl Write for MqttTransport {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await
    }
}

/// Everything needed to start the radio later.
pub struct RadioParts {
    pub wifi: WIFI<'static>,
    pub spawner: Spawner,
    pub seed: u64,
}

struct Radio {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

enum RadioState {
    Dormant(RadioParts),
    Up(Radio),
    Failed,
}

/// Synced wall clock: epoch seconds at a boot-relative instant.
#[derive(Clone, Copy)]
struct ClockAnchor {
    epoch: u32,
    at: Instant,
}

pub struct EspNetwork {
    radio: RadioState,
    clock: Option<ClockAnchor>,
    session: Option<Session>,
}

impl EspNetwork {
    pub const fn new(parts: RadioParts) -> Self {
        Self {
            radio: RadioState::Dormant(parts),
            clock: None,
            session: None,
        }
    }

    /// Starts the radio and network stack on first use.
    fn radio(&mut self) -> Result<&mut Radio, NetworkError> {
        if matches!(self.radio, RadioState::Dormant(_))
            && let RadioState::Dormant(parts) =
                core::mem::replace(&mut self.radio, RadioState::Failed)
        {
            self.radio = RadioState::Up(start_radio(parts)?);
        }

        match &mut self.radio {
            RadioState::Up(radio) => Ok(radio),
            _ => Err(NetworkError::WifiFailed {
                details: "radio failed to start earlier this boot",
            }),
        }
    }

    async fn resolve(stack: Stack<'static>, host: &str) -> Option<IpAddress> {
        match stack.dns_query(host, DnsQueryType::A).await {
            Ok(addresses) => addresses.first().copied(),
            Err(e) => {
                warn!("DNS lookup for {} failed: {:?}", host, e);
                None
            }
        }
    }

    async fn fetch_ntp(stack: Stack<'static>) -> Result<u32, NetworkError> {
        let server = Self::resolve(stack, NTP_HOST)
            .await
            .ok_or(NetworkError::TimeSyncFailed {
                details: "NTP host did not resolve",
            })?;

        let mut rx_meta = [PacketMetadata::EMPTY; 1];
        let mut tx_meta = [PacketMetadata::EMPTY; 1];
        let mut rx_buffer = [0u8; 128];
        let mut tx_buffer = [0u8; 128];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NetworkError::TimeSyncFailed {
            details: "could not bind UDP socket",
        })?;

        let mut packet = sntp::request();
        socket
            .send_to(&packet, IpEndpoint::new(server, NTP_PORT))
            .await
            .map_err(|_| NetworkError::TimeSyncFailed {
                details: "NTP request not sent",
            })?;

        let (len, _) = socket
            .recv_from(&mut packet)
            .await
            .map_err(|_| NetworkError::TimeSyncFailed {
                details: "NTP reply not received",
            })?;

        sntp::decode_reply(&packet[..len.min(NTP_PACKET_LEN)])
            .inspect_err(|e| warn!("Rejected NTP reply: {}", e))
    }

    async fn open_session(stack: Stack<'static>) -> Result<Session, NetworkError> {
        let broker = Self::resolve(stack, MQTT_HOST)
            .await
            .ok_or(NetworkError::MessageQueueFailed {
                details: "broker host did not resolve",
            })?;

        // Leaked: the heap does not survive the deep sleep that ends this boot.
        let rx = vec![0u8; TCP_BUFFER_LEN].leak();
        let tx = vec![0u8; TCP_BUFFER_LEN].leak();
        let mut socket = TcpSocket::new(stack, rx, tx);
        socket.set_timeout(Some(Duration::from_secs(10)));
        socket
            .connect(IpEndpoint::new(broker, mqtt_port()))
            .await
            .map_err(|e| {
                error!("TCP connect to broker failed: {:?}", e);
                NetworkError::MessageQueueFailed {
                    details: "TCP connect failed",
                }
            })?;

        let mut config = MqttConfig::new(MqttVersion::MQTTv5, CountingRng(0));
        config.add_client_id(DEVICE_ID);
        config.keep_alive = MQTT_KEEP_ALIVE_SECS;
        if !MQTT_USERNAME.is_empty() {
            config.add_username(MQTT_USERNAME);
            if !MQTT_PASSWORD.is_empty() {
                config.add_password(MQTT_PASSWORD);
            }
        }

        let write_buffer = vec![0u8; MQTT_BUFFER_LEN].leak();
        let recv_buffer = vec![0u8; MQTT_BUFFER_LEN].leak();
        let mut client = MqttClient::new(
            MqttTransport { socket },
            write_buffer,
            MQTT_BUFFER_LEN,
            recv_buffer,
            MQTT_BUFFER_LEN,
            config,
        );

        client.connect_to_broker().await.map_err(|reason| {
            error!("Broker refused connection: {:?}", reason);
            NetworkError::MessageQueueFailed {
                details: "broker refused connection",
            }
        })?;
        Ok(client)
    }
}

fn start_radio(parts: RadioParts) -> Result<Radio, NetworkError> {
    static RADIO: StaticCell<Controller<'static>> = StaticCell::new();
    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

    let controller = esp_radio::init().map_err(|e| {
        error!("Radio init failed: {:?}", e);
        NetworkError::WifiFailed {
            details: "radio init failed",
        }
    })?;
    let controller = RADIO.init(controller);

    let (wifi, interfaces) =
        esp_radio::wifi::new(controller, parts.wifi, Default::default()).map_err(|e| {
            error!("WiFi driver init failed: {:?}", e);
            NetworkError::WifiFailed {
                details: "WiFi driver init failed",
            }
        })?;

    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        parts.seed,
    );
    if parts.spawner.spawn(net_task(runner)).is_err() {
        return Err(NetworkError::WifiFailed {
            details: "network task did not spawn",
        });
    }

    info!("Radio started");
    Ok(Radio {
        controller: wifi,
        stack,
    })
}

/// Associates and waits for a DHCP lease.
async fn associate(radio: &mut Radio) -> Result<(), NetworkError> {
    if !matches!(radio.controller.is_started(), Ok(true)) {
        // Credentials are set on every boot and never written to flash.
        let config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(WIFI_SSID.into())
                .with_password(WIFI_PASSWORD.into()),
        );
        radio.controller.set_config(&config).map_err(|e| {
            error!("WiFi config rejected: {:?}", e);
            NetworkError::WifiFailed {
                details: "config rejected",
            }
        })?;
        radio.controller.start_async().await.map_err(|e| {
            error!("WiFi start failed: {:?}", e);
            NetworkError::WifiFailed {
                details: "start failed",
            }
        })?;
    }

    debug!("Associating with {}", WIFI_SSID);
    radio.controller.connect_async().await.map_err(|e| {
        error!("WiFi association failed: {:?}", e);
        NetworkError::WifiFailed {
            details: "association failed",
        }
    })?;

    radio.stack.wait_config_up().await;
    if let Some(config) = radio.stack.config_v4() {
        info!("Got IP {}", config.address);
    }
    Ok(())
}

impl NetworkLink for EspNetwork {
    async fn connect_wifi(&mut self, timeout_ms: u32) -> Result<(), NetworkError> {
        let radio = self.radio()?;
        with_timeout(Duration::from_millis(timeout_ms.into()), associate(radio))
            .await
            .map_err(|_| NetworkError::WifiTimeout { timeout_ms })?
    }

    async fn sync_time(&mut self, timeout_ms: u32) -> Result<u32, NetworkError> {
        let stack = self.radio()?.stack;
        let epoch = with_timeout(Duration::from_millis(timeout_ms.into()), Self::fetch_ntp(stack))
            .await
            .map_err(|_| NetworkError::TimeSyncFailed {
                details: "NTP timed out",
            })??;

        self.clock = Some(ClockAnchor {
            epoch,
            at: Instant::now(),
        });
        Ok(epoch)
    }

    fn now(&mut self) -> Option<u32> {
        self.clock.map(|anchor| {
            let elapsed = anchor.at.elapsed().as_secs();
            anchor.epoch.saturating_add(u32::try_from(elapsed).unwrap_or(u32::MAX))
        })
    }

    async fn connect_message_queue(&mut self, timeout_ms: u32) -> Result<(), NetworkError> {
        // A failed publish leaves a dead session behind; replace it.
        self.session = None;
        let stack = self.radio()?.stack;
        let session = with_timeout(Duration::from_millis(timeout_ms.into()), Self::open_session(stack))
            .await
            .map_err(|_| NetworkError::MessageQueueFailed {
                details: "broker connect timed out",
            })??;
        self.session = Some(session);
        Ok(())
    }

    async fn publish(&mut self, payload: &[u8]) -> Result<(), NetworkError> {
        let session = self.session.as_mut().ok_or(NetworkError::PublishFailed {
            details: "no broker session",
        })?;

        let sent = with_timeout(
            PUBLISH_TIMEOUT,
            session.send_message(MQTT_TOPIC, payload, QualityOfService::QoS1, false),
        )
        .await;

        match sent {
            Ok(Ok(()) | Err(ReasonCode::NoMatchingSubscribers)) => Ok(()),
            Ok(Err(reason)) => {
                error!("Publish to {} failed: {:?}", MQTT_TOPIC, reason);
                self.session = None;
                Err(NetworkError::PublishFailed {
                    details: "broker did not acknowledge",
                })
            }
            Err(_) => {
                error!("Publish to {} timed out", MQTT_TOPIC);
                self.session = None;
                Err(NetworkError::PublishFailed {
                    details: "PUBACK timed out",
                })
            }
        }
    }

    async fn shutdown(&mut self) {
        if with_timeout(SHUTDOWN_TIMEOUT, self.power_down()).await.is_err() {
            warn!("Radio shutdown timed out, sleeping anyway");
        }
        self.session = None;
        self.clock = None;
    }
}

impl EspNetwork {
    async fn power_down(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(reason) = session.disconnect().await {
                debug!("MQTT disconnect: {:?}", reason);
            }
        }

        if let RadioState::Up(radio) = &mut self.radio {
            if let Err(e) = radio.controller.disconnect_async().await {
                debug!("WiFi disconnect: {:?}", e);
            }
            if let Err(e) = radio.controller.stop_async().await {
                warn!("WiFi stop failed: {:?}", e);
            }
            info!("Radio stopped");
        }
    }
}
