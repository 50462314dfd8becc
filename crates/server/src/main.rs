mod demo;
mod transport;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use syncline::{EngineConfig, PlayerId, ServerEngine};

use demo::DemoHooks;
use transport::UdpPeer;

#[derive(Parser)]
#[command(name = "syncline-server")]
#[command(about = "Syncline demo replication server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 27960)]
    port: u16,

    #[arg(short, long, default_value_t = 30)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 1)]
    send_rate: u8,

    #[arg(short, long, default_value_t = 32)]
    max_players: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = Rc::new(UdpSocket::bind((args.bind.as_str(), args.port))?);
    socket.set_nonblocking(true)?;
    log::info!(
        "listening on {} at {} Hz (send rate {})",
        socket.local_addr()?,
        args.tick_rate,
        args.send_rate
    );

    let mut engine = ServerEngine::new(
        EngineConfig {
            tick_rate: args.tick_rate,
            send_rate: args.send_rate,
            input_size: demo::INPUT_SIZE,
            max_players: args.max_players,
            ..EngineConfig::default()
        },
        demo::registry(),
    );
    let mut hooks = DemoHooks::new(args.tick_rate);
    let mut players: HashMap<SocketAddr, PlayerId> = HashMap::new();
    let mut recv_buffer = [0u8; 2048];
    let mut last = Instant::now();

    loop {
        loop {
            match socket.recv_from(&mut recv_buffer) {
                Ok((size, addr)) => {
                    let player = match players.get(&addr).copied() {
                        Some(player) => Some(player),
                        None => {
                            let player = connect(&mut engine, &mut hooks, &socket, addr);
                            if let Some(player) = player {
                                players.insert(addr, player);
                            }
                            player
                        }
                    };
                    if let Some(player) = player {
                        engine.handle_packet(player, &recv_buffer[..size]);
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::error!("recv failed: {err}");
                    break;
                }
            }
        }

        let now = Instant::now();
        engine.update((now - last).as_secs_f32(), &mut hooks);
        last = now;

        std::thread::sleep(Duration::from_millis(1));
    }
}

/// First datagram from a new address: bind a player and spawn its pair of
/// controller and cube.
fn connect(
    engine: &mut ServerEngine,
    hooks: &mut DemoHooks,
    socket: &Rc<UdpSocket>,
    addr: SocketAddr,
) -> Option<PlayerId> {
    let peer = UdpPeer::new(Rc::clone(socket), addr);
    let Some(player) = engine.add_player(Box::new(peer)) else {
        log::warn!("rejecting {addr}: server full");
        return None;
    };

    let spawn = (player as usize * 2) as f32;
    let spawned = engine
        .add_entity(demo::CLASS_CUBE, player, |world, id| {
            let _ = world.set_field(id, demo::FIELD_X, spawn);
            let _ = world.set_field(id, demo::FIELD_Y, 0.0f32);
            let _ = world.set_field(id, demo::FIELD_COLOR, 0x00FF_7F00u32 | player as u32);
        })
        .and_then(|pawn| {
            let controller = engine.add_controller(demo::CLASS_CONTROLLER, player, |_, _| {})?;
            Ok((pawn, controller))
        });

    match spawned {
        Ok((pawn, controller)) => {
            let _ = engine.set_controlled_pawn(controller, Some(pawn));
            hooks.bind_pawn(player, pawn);
            log::info!("player {player} from {addr}: cube {pawn}");
            Some(player)
        }
        Err(err) => {
            log::error!("spawn for {addr} failed: {err}");
            engine.remove_player(player);
            None
        }
    }
}
