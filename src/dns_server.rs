//! UDP and TCP front ends feeding queries into each zone's handler chain.

use crate::config::Config;
use crate::plugin::{zone_matches, Next, ResponseWriter};
use crate::types::DnsMessage;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// EDNS-era conservative ceiling for UDP payloads; larger responses get
/// truncated with TC set.
const MAX_UDP_PAYLOAD: usize = 1232;

pub struct DnsServer {
    config: Arc<Config>,
}

struct UdpWriter {
    socket: Arc<UdpSocket>,
    src: SocketAddr,
}

#[async_trait]
impl ResponseWriter for UdpWriter {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.src)
    }

    async fn write_msg(&mut self, msg: &DnsMessage) -> Result<()> {
        if msg.raw.len() > MAX_UDP_PAYLOAD {
            let mut truncated = msg.raw[..MAX_UDP_PAYLOAD].to_vec();
            truncated[2] |= 0x02; // TC
            self.socket.send_to(&truncated, self.src).await?;
        } else {
            self.socket.send_to(&msg.raw, self.src).await?;
        }
        Ok(())
    }
}

struct TcpWriter {
    stream: TcpStream,
    src: SocketAddr,
}

#[async_trait]
impl ResponseWriter for TcpWriter {
    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.src)
    }

    async fn write_msg(&mut self, msg: &DnsMessage) -> Result<()> {
        let len = msg.raw.len() as u16;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&msg.raw).await?;
        Ok(())
    }
}

impl DnsServer {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self { config: Arc::new(config) })
    }

    pub async fn run(&self, default_address: String) -> Result<()> {
        let base_ip = default_address.split(':').next().unwrap_or("0.0.0.0").to_string();

        // Zones sharing a port share one pair of listeners.
        let mut bind_map: HashMap<u16, Vec<usize>> = HashMap::new();
        for (i, zone) in self.config.zones.iter().enumerate() {
            bind_map.entry(zone.port()).or_default().push(i);
        }

        let mut tasks = Vec::new();
        for (port, zone_indices) in bind_map {
            let bind_addr = format!("{}:{}", base_ip, port);
            let udp_socket = match UdpSocket::bind(&bind_addr).await {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    tracing::error!("failed to bind UDP {}: {}", bind_addr, e);
                    continue;
                }
            };
            let tcp_listener = match TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("failed to bind TCP {}: {}", bind_addr, e);
                    continue;
                }
            };
            tracing::info!("listening on {} (udp/tcp) for {} zone(s)", bind_addr, zone_indices.len());

            let zone_indices = Arc::new(zone_indices);

            let config = self.config.clone();
            let socket = udp_socket.clone();
            let zones = zone_indices.clone();
            tasks.push(tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let Ok((size, src)) = socket.recv_from(&mut buf).await else {
                        continue;
                    };
                    let raw = buf[..size].to_vec();
                    let config = config.clone();
                    let socket = socket.clone();
                    let zones = zones.clone();
                    tokio::spawn(async move {
                        let mut w = UdpWriter { socket, src };
                        handle_query(config, &zones, raw, src, "udp", port, &mut w).await;
                    });
                }
            }));

            let config = self.config.clone();
            let zones = zone_indices.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let Ok((mut stream, src)) = tcp_listener.accept().await else {
                        continue;
                    };
                    let config = config.clone();
                    let zones = zones.clone();
                    tokio::spawn(async move {
                        let mut len_buf = [0u8; 2];
                        if stream.read_exact(&mut len_buf).await.is_err() {
                            return;
                        }
                        let len = u16::from_be_bytes(len_buf) as usize;
                        let mut raw = vec![0u8; len];
                        if stream.read_exact(&mut raw).await.is_err() {
                            return;
                        }
                        let mut w = TcpWriter { stream, src };
                        handle_query(config, &zones, raw, src, "tcp", port, &mut w).await;
                    });
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn handle_query(
    config: Arc<Config>,
    zone_indices: &[usize],
    raw: Vec<u8>,
    src: SocketAddr,
    proto: &str,
    port: u16,
    w: &mut dyn ResponseWriter,
) {
    let mut msg = match DnsMessage::from_wire(raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("dropping malformed query from {}: {}", src, e);
            return;
        }
    };
    msg.client_addr = Some(src);
    msg.protocol = proto.to_string();
    msg.server_port = Some(port);

    // Route to the first zone on this port containing the query name,
    // falling back to the first zone.
    let qname = msg.qname();
    let idx = zone_indices
        .iter()
        .copied()
        .find(|&i| zone_matches(config.zones[i].origin(), &qname))
        .unwrap_or(zone_indices[0]);
    let zone = &config.zones[idx];

    let (rc, err) = Next::new(&zone.handlers).invoke(w, &msg).await;
    if let Some(e) = err {
        tracing::error!("[{}] query {} failed with rcode {}: {}", zone.name, qname, rc, e);
    }
}
