//! 패킷과 전송 계층 경계
//!
//! 코어는 datagram 소켓을 직접 다루지 않고 [`Transport`]를 통해서만 주고받는다.
//! `tokio::net::UdpSocket` 구현과 멀티캐스트 바인딩 도우미를 함께 제공.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::fault::{FaultAction, FaultPolicy};
use crate::{Error, Result};

/// 수신한 datagram 하나
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub remote: SocketAddr,
}

impl Packet {
    pub fn new(data: Bytes, remote: SocketAddr) -> Self {
        Self { data, remote }
    }

    /// 피어 식별자 (송신 주소 문자열)
    pub fn peer_id(&self) -> String {
        self.remote.to_string()
    }
}

/// datagram 전송 계층
pub trait Transport: Send + Sync + 'static {
    /// `destination`으로 한 datagram 전송. 실제 전송된 바이트 수 반환.
    fn transmit(
        &self,
        frame: &[u8],
        destination: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// 다음 datagram 수신
    fn receive(&self, buf: &mut [u8])
        -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;
}

impl Transport for UdpSocket {
    async fn transmit(&self, frame: &[u8], destination: SocketAddr) -> io::Result<usize> {
        self.send_to(frame, destination).await
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// IPv4 멀티캐스트 그룹 수신 소켓
///
/// 그룹 포트로 바인딩하고 `interface`에서 그룹에 가입한다.
/// `Ipv4Addr::UNSPECIFIED`면 커널이 인터페이스를 고른다.
pub async fn bind_multicast(group: SocketAddrV4, interface: Ipv4Addr) -> Result<UdpSocket> {
    if !group.ip().is_multicast() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("멀티캐스트 주소가 아님: {}", group.ip()),
        )
        .into());
    }

    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port())).await?;
    socket.join_multicast_v4(*group.ip(), interface)?;
    socket.set_multicast_loop_v4(true)?;
    info!("멀티캐스트 그룹 가입: {} (interface {})", group, interface);
    Ok(socket)
}

/// 임의 포트 IPv4 소켓 (송신 및 컨트롤 명령용)
pub async fn bind_unicast() -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    debug!("컨트롤 소켓 바인딩: {}", socket.local_addr()?);
    Ok(socket)
}

/// intake 루프 설정
pub(crate) struct Intake<T> {
    pub transport: Arc<T>,
    pub tx: mpsc::Sender<Packet>,
    pub running: Arc<AtomicBool>,
    pub buffer_size: usize,
    pub poll_interval: Duration,
    pub policy: Arc<dyn FaultPolicy>,
    pub task: &'static str,
}

impl<T: Transport> Intake<T> {
    /// 전송 계층에서 패킷을 받아 큐에 넣는다.
    ///
    /// 실행 플래그가 꺼지거나, 큐 소비자가 사라지거나, 장애 정책이 종료를 고르면 반환.
    pub async fn run(self) {
        let mut buf = vec![0u8; self.buffer_size];

        while self.running.load(Ordering::SeqCst) {
            let received =
                match tokio::time::timeout(self.poll_interval, self.transport.receive(&mut buf)).await {
                    Ok(received) => received,
                    Err(_) => continue, // 타임아웃, 실행 플래그 재확인
                };

            match received {
                Ok((len, remote)) => {
                    trace!("{}: {} bytes from {}", self.task, len, remote);
                    let packet = Packet::new(Bytes::copy_from_slice(&buf[..len]), remote);
                    if self.tx.send(packet).await.is_err() {
                        debug!("{}: 큐 소비자 종료", self.task);
                        break;
                    }
                }
                Err(e) => {
                    if self.policy.on_fault(self.task, &Error::Io(e)) == FaultAction::Shutdown {
                        break;
                    }
                }
            }
        }

        debug!("{} 종료", self.task);
    }
}
