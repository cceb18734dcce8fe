//! Loopback peers and trackers for end-to-end tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{BufMut, BytesMut};
use surge_core::config::SurgeConfig;
use surge_core::torrent::protocol::{HandshakeCodec, MessageCodec};
use surge_core::torrent::{
    InfoHash, PeerHandshake, PeerId, PeerMessage, PieceIndex, TorrentFile, TorrentMetadata,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Deterministic payload of `len` bytes.
pub fn create_test_content(len: usize) -> Arc<Vec<u8>> {
    Arc::new((0..len).map(|i| (i * 7 % 251) as u8).collect())
}

/// Metadata for `files` (name, length) under a torrent called `name`.
///
/// One entry produces a single-file torrent named after that entry.
pub fn create_test_metadata(
    info_hash: InfoHash,
    name: &str,
    piece_length: u32,
    files: &[(&str, u64)],
    announce_urls: Vec<String>,
) -> TorrentMetadata {
    let total_length: u64 = files.iter().map(|(_, len)| len).sum();
    let files = if files.len() == 1 {
        vec![TorrentFile {
            path: vec![name.to_string()],
            length: total_length,
        }]
    } else {
        files
            .iter()
            .map(|(file, length)| TorrentFile {
                path: vec![name.to_string(), file.to_string()],
                length: *length,
            })
            .collect()
    };

    TorrentMetadata {
        info_hash,
        name: name.to_string(),
        piece_length,
        piece_hashes: vec![[0u8; 20]; total_length.div_ceil(u64::from(piece_length)) as usize],
        total_length,
        files,
        announce_urls,
    }
}

pub fn create_test_config(work_dir: &std::path::Path) -> SurgeConfig {
    let mut config = SurgeConfig::for_testing();
    config.storage.work_dir = work_dir.to_path_buf();
    config
}

async fn read_message(stream: &mut TcpStream) -> Option<PeerMessage> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.ok()?;
    let mut frame = len.to_vec();
    frame.resize(4 + u32::from_be_bytes(len) as usize, 0);
    stream.read_exact(&mut frame[4..]).await.ok()?;
    MessageCodec::deserialize_message(&frame).ok()
}

async fn write_message(stream: &mut TcpStream, message: &PeerMessage) -> std::io::Result<()> {
    stream
        .write_all(&MessageCodec::serialize_message(message))
        .await
}

/// A seeding peer on a loopback port.
pub struct MockSeeder {
    pub address: SocketAddr,
    served: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockSeeder {
    /// Serves `content` to every connection. After `max_blocks` blocks in
    /// total it keeps the connection open but answers nothing.
    pub async fn spawn(
        info_hash: InfoHash,
        piece_length: u32,
        content: Arc<Vec<u8>>,
        max_blocks: Option<usize>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&served);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let content = Arc::clone(&content);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let _ = seed(stream, info_hash, piece_length, content, counter, max_blocks)
                        .await;
                });
            }
        });

        Self {
            address,
            served,
            task,
        }
    }

    pub fn blocks_served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockSeeder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn seed(
    mut stream: TcpStream,
    info_hash: InfoHash,
    piece_length: u32,
    content: Arc<Vec<u8>>,
    served: Arc<AtomicUsize>,
    max_blocks: Option<usize>,
) -> std::io::Result<()> {
    let mut handshake = [0u8; 68];
    stream.read_exact(&mut handshake).await?;
    let reply = PeerHandshake::new(info_hash, PeerId::new(*b"-MOCK00-seederseeder"));
    stream
        .write_all(&HandshakeCodec::serialize_handshake(&reply))
        .await?;

    let piece_count = (content.len() as u64).div_ceil(u64::from(piece_length)) as usize;
    let mut bitfield = vec![0u8; piece_count.div_ceil(8)];
    for piece in 0..piece_count {
        bitfield[piece / 8] |= 0x80 >> (piece % 8);
    }
    write_message(
        &mut stream,
        &PeerMessage::Bitfield {
            bitfield: bitfield.into(),
        },
    )
    .await?;
    write_message(&mut stream, &PeerMessage::Unchoke).await?;

    while let Some(message) = read_message(&mut stream).await {
        let PeerMessage::Request {
            piece_index,
            offset,
            length,
        } = message
        else {
            continue;
        };
        if max_blocks.is_some_and(|max| served.load(Ordering::SeqCst) >= max) {
            continue;
        }

        let start = piece_index.as_usize() * piece_length as usize + offset as usize;
        let data = content[start..start + length as usize].to_vec();
        served.fetch_add(1, Ordering::SeqCst);
        write_message(
            &mut stream,
            &PeerMessage::Piece {
                piece_index,
                offset,
                data: data.into(),
            },
        )
        .await?;
    }
    Ok(())
}

/// A peer that answers the handshake for a different torrent.
pub async fn spawn_wrong_torrent_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut handshake = [0u8; 68];
            if stream.read_exact(&mut handshake).await.is_err() {
                continue;
            }
            let reply = PeerHandshake::new(InfoHash::new([0xEE; 20]), PeerId::new([0xEE; 20]));
            let _ = stream
                .write_all(&HandshakeCodec::serialize_handshake(&reply))
                .await;
        }
    });
    address
}

fn compact_peers(peers: &[SocketAddr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(peers.len() * 6);
    for peer in peers {
        if let SocketAddr::V4(v4) = peer {
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    out
}

/// HTTP tracker answering every announce with `peers` in compact form.
///
/// Returns the announce URL and a log of request targets it received.
pub async fn spawn_http_tracker(
    peers: Vec<SocketAddr>,
) -> (String, Arc<parking_lot::Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let requests = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let log = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                match stream.read(&mut byte).await {
                    Ok(1) => head.push(byte[0]),
                    _ => break,
                }
            }
            let request_line = String::from_utf8_lossy(&head)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            log.lock().push(request_line);

            let compact = compact_peers(&peers);
            let mut body = format!("d8:intervali900e5:peers{}:", compact.len()).into_bytes();
            body.extend_from_slice(&compact);
            body.push(b'e');

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{address}/announce"), requests)
}

/// UDP tracker speaking BEP 15, answering with `peers`.
pub async fn spawn_udp_tracker(peers: Vec<SocketAddr>, seeders: u32, leechers: u32) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    const CONNECTION_ID: u64 = 0x0102_0304_0506_0708;

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        while let Ok((len, from)) = socket.recv_from(&mut buf).await {
            let datagram = &buf[..len];
            if len < 16 {
                continue;
            }
            let action = u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]);
            let transaction = &datagram[12..16];

            let mut reply = BytesMut::new();
            match (action, len) {
                (0, 16) => {
                    reply.put_u32(0);
                    reply.put_slice(transaction);
                    reply.put_u64(CONNECTION_ID);
                }
                (1, 98) if datagram[..8] == CONNECTION_ID.to_be_bytes() => {
                    reply.put_u32(1);
                    reply.put_slice(transaction);
                    reply.put_u32(1800);
                    reply.put_u32(leechers);
                    reply.put_u32(seeders);
                    reply.put_slice(&compact_peers(&peers));
                }
                _ => {
                    reply.put_u32(3);
                    reply.put_slice(transaction);
                    reply.put_slice(b"unexpected request");
                }
            }
            let _ = socket.send_to(&reply, from).await;
        }
    });

    format!("udp://{address}")
}

/// UDP tracker that never answers.
pub async fn spawn_silent_udp_tracker() -> (String, UdpSocket) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let url = format!("udp://{}", socket.local_addr().unwrap());
    (url, socket)
}

pub fn piece(index: u32) -> PieceIndex {
    PieceIndex::new(index)
}
