//! Per-send-tick snapshot emission.
//!
//! Players still requesting a baseline get the full world, LZ4-compressed,
//! on the reliable channel. Everyone else gets an unreliable diff against
//! their acknowledged tick, split into MTU-sized parts. A diff too large
//! for the part limit silently forces the player back to a baseline.

use crate::entity::{EntityId, EntityWorld};
use crate::player::{Player, PlayerState, PlayerTable};
use crate::protocol::{
    BaselineHeader, DiffPartHeader, LastPartData, PacketKind, put_pod,
};
use crate::seq::{Tick, seq_diff};
use crate::transport::DeliveryMethod;

/// Most parts a single tick's diff may span per player.
pub const MAX_PARTS: usize = 64;

/// Runs the send side of one tick for every connected player, then hints a
/// transport flush.
pub(crate) fn run_send_tick(
    world: &mut EntityWorld,
    players: &mut PlayerTable,
    header_byte: u8,
    send_rate: u8,
    current_tick: Tick,
) {
    let executed_tick = current_tick.wrapping_sub(1);
    let minimal_tick = players
        .iter()
        .filter(|p| p.is_synchronized())
        .map(|p| p.state_a_tick)
        .reduce(|a, b| if seq_diff(b, a) < 0 { b } else { a })
        .unwrap_or(executed_tick);

    world.trim_all(minimal_tick);

    let ids: Vec<EntityId> = world.replicated_ids().collect();
    for player_id in players.active_ids() {
        let Some(player) = players.get_mut(player_id) else {
            continue;
        };
        if player.state == PlayerState::RequestBaseline {
            send_baseline(world, player, &ids, header_byte, send_rate, executed_tick);
        } else {
            send_diff(world, player, &ids, header_byte, executed_tick, minimal_tick);
        }
    }

    for player_id in players.active_ids() {
        if let Some(player) = players.get_mut(player_id) {
            player.peer.trigger_update();
        }
    }
}

fn send_baseline(
    world: &EntityWorld,
    player: &mut Player,
    ids: &[EntityId],
    header_byte: u8,
    send_rate: u8,
    executed_tick: Tick,
) {
    let max_body: usize = ids
        .iter()
        .filter_map(|&id| {
            let class = world.class(world.serializer(id).class_id())?;
            Some(world.serializer(id).max_size_hint(class))
        })
        .sum();
    let mut body = Vec::with_capacity(max_body);

    for &id in ids {
        let Some(entry) = world.get(id) else {
            // Destroyed but unreleased: the baseline starts past it.
            continue;
        };
        let Some(class) = world.class(entry.class_id) else {
            continue;
        };
        world
            .serializer(id)
            .make_baseline(id, player.id, class, &entry.block, &mut body);
    }

    let header = BaselineHeader {
        user_header: header_byte,
        packet_type: PacketKind::BaselineSync as u8,
        original_length: body.len() as u32,
        tick: executed_tick,
        player_id: player.id,
        send_rate,
    };
    let mut packet = Vec::with_capacity(
        BaselineHeader::SIZE + lz4_flex::block::get_maximum_output_size(body.len()),
    );
    put_pod(&mut packet, &header);
    packet.extend_from_slice(&lz4_flex::compress(&body));

    player.peer.send(&packet, DeliveryMethod::ReliableOrdered);
    player.state_a_tick = executed_tick;
    player.current_server_tick = executed_tick;
    player.state = PlayerState::WaitingForFirstInput;
    log::debug!(
        "baseline for player {}: {} -> {} bytes at tick {}",
        player.id,
        body.len(),
        packet.len(),
        executed_tick
    );
}

fn send_diff(
    world: &mut EntityWorld,
    player: &mut Player,
    ids: &[EntityId],
    header_byte: u8,
    executed_tick: Tick,
    minimal_tick: Tick,
) {
    use crate::serializer::DiffResult;

    let ack_tick = player.current_server_tick;
    let max_body: usize = ids
        .iter()
        .filter(|&&id| world.serializer(id).is_live())
        .filter_map(|&id| {
            let serializer = world.serializer(id);
            let class = world.class(serializer.class_id())?;
            Some(serializer.max_size_hint(class))
        })
        .sum();
    let mut body = Vec::with_capacity(max_body);
    let mut recycle = Vec::new();

    for &id in ids {
        let serializer = world.serializer(id);
        if !serializer.is_live() {
            continue;
        }
        let Some(class) = world.class(serializer.class_id()) else {
            continue;
        };
        let block = world.get(id).map(|entry| entry.block.as_ref());
        let result = serializer.make_diff(
            id,
            player.id,
            class,
            block,
            executed_tick,
            minimal_tick,
            ack_tick,
            &mut body,
        );
        if result == DiffResult::DoneAndDestroy {
            recycle.push(id);
        }
    }
    for id in recycle {
        world.recycle(id);
    }

    let mtu = player.peer.max_single_packet_size(DeliveryMethod::Unreliable);
    let max_part_size = mtu.saturating_sub(LastPartData::SIZE);
    let Some(chunk) = max_part_size.checked_sub(DiffPartHeader::SIZE).filter(|&c| c > 0) else {
        player.state = PlayerState::RequestBaseline;
        return;
    };

    let parts = body.len().div_ceil(chunk).max(1);
    if parts > MAX_PARTS {
        // The ack window diverged past one whole snapshot; resynchronize
        // reliably next send tick.
        player.state = PlayerState::RequestBaseline;
        log::debug!(
            "diff for player {} needs {} parts, re-baselining",
            player.id,
            parts
        );
        return;
    }

    let mut packet = Vec::with_capacity(max_part_size + LastPartData::SIZE);
    for part in 0..parts {
        let is_last = part == parts - 1;
        let header = DiffPartHeader {
            user_header: header_byte,
            packet_type: if is_last {
                PacketKind::DiffSyncLast as u8
            } else {
                PacketKind::DiffSync as u8
            },
            part: part as u8,
            tick: executed_tick,
        };
        packet.clear();
        put_pod(&mut packet, &header);
        let start = part * chunk;
        let end = if is_last { body.len() } else { start + chunk };
        packet.extend_from_slice(&body[start..end]);
        if is_last {
            put_pod(
                &mut packet,
                &LastPartData {
                    last_processed_tick: player.last_processed_tick,
                    last_received_tick: player.last_received_tick,
                    mtu: max_part_size as u16,
                },
            );
        }
        player.peer.send(&packet, DeliveryMethod::Unreliable);
    }
}
