//! Core protocol types for mazenet's wire format.
//!
//! Every type in this module travels "on the wire": it is serialized by the
//! sender, carried inside an [`Envelope`], and rebuilt by the receiver.
//! The message set is closed: each message has a fixed [`TypeTag`] and a
//! fixed delivery intent, both declared once through [`WireType`](crate::WireType).

use std::fmt;

use serde::{Deserialize, Serialize};

use mazenet_transport::Lane;

/// The protocol version. A client whose handshake carries any other value
/// is refused.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for an entity in one world instance.
///
/// Allocated by the server, never reused while the server runs. Clients
/// only ever compare these for equality.
///
/// `#[serde(transparent)]` makes it encode as the bare `u64`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E-{}", self.0)
    }
}

/// The wire identifier of a registered type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct TypeTag(pub u16);

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Channel & Envelope
// ---------------------------------------------------------------------------

/// The logical channel a message belongs to.
///
/// Session control and replication share one socket but are queued
/// separately, so a burst of state sync never delays control traffic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum Channel {
    /// Handshake, identity, clock, map, and move messages.
    #[default]
    Control,
    /// Entity/component replication batches.
    Replication,
}

impl From<Channel> for Lane {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Control => Lane::Control,
            Channel::Replication => Lane::Replication,
        }
    }
}

/// The top-level wire format. Every frame on the socket is one Envelope.
///
/// ```text
/// ┌──────────────────────────────┐
/// │ seq: 42                      │  ← per-channel sequence number
/// │ channel: Control             │  ← logical channel
/// │ tag: #12                     │  ← which registered type the body is
/// │ body: [...bytes...]          │  ← encoded by the registry
/// └──────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sequence number. Control frames count per connection; replication
    /// frames carry the simulation tick.
    pub seq: u64,
    /// The logical channel this frame travelled on.
    pub channel: Channel,
    /// Type of the body.
    pub tag: TypeTag,
    /// The body, encoded by the registry binding for `tag`.
    pub body: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// One cell of the maze grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cell {
    Wall,
    Floor,
}

/// A cardinal movement direction. North is towards row 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Grid offset `(dx, dy)` of one step in this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::North => (0, -1),
            Self::East => (1, 0),
            Self::South => (0, 1),
            Self::West => (-1, 0),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::North => "north",
            Self::East => "east",
            Self::South => "south",
            Self::West => "west",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Client → Server: first frame on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u32,
}

/// Server → Client: the version matched, the session exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAccepted {
    pub connection: u64,
}

/// Server → Client: the connection is refused and about to close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRejected {
    pub reason: String,
}

/// Client → Server: "this is who I am". Only the first one counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAnnounce {
    pub name: String,
}

/// Server → Client: the entity spawned for this connection's player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAssigned {
    pub entity: EntityId,
}

/// Clock round trip, both directions.
///
/// The client sends its current estimate of server time in both fields.
/// The server answers with `sent_time` echoed and `observed_time` set to
/// its own clock. A reply whose fields are still equal was never stamped
/// and carries no information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockPing {
    /// Milliseconds; the client's estimated server time at send.
    pub sent_time: u64,
    /// Milliseconds; the server time observed by the peer.
    pub observed_time: u64,
}

/// Server → Client: the server clock at the moment of sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTime {
    /// Milliseconds since the server started.
    pub server_time: u64,
}

/// Server → Client: the full maze grid, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapData {
    pub width: u32,
    pub height: u32,
    pub cells: Vec<Cell>,
}

impl MapData {
    /// A rectangle of floor surrounded by a one-cell wall.
    pub fn walled(width: u32, height: u32) -> Self {
        let mut cells = Vec::with_capacity((width as usize).saturating_mul(height as usize));
        for y in 0..height {
            for x in 0..width {
                let edge = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
                cells.push(if edge { Cell::Wall } else { Cell::Floor });
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    /// `true` when the grid holds exactly `width * height` cells.
    pub fn is_consistent(&self) -> bool {
        self.cells.len() as u64 == u64::from(self.width) * u64::from(self.height)
    }

    /// The cell at `(x, y)`, or `None` outside the grid.
    pub fn cell(&self, x: i32, y: i32) -> Option<Cell> {
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as u32, y as u32);
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = u64::from(y) * u64::from(self.width) + u64::from(x);
        self.cells.get(usize::try_from(index).ok()?).copied()
    }

    /// `true` if `(x, y)` is inside the grid and walkable.
    pub fn is_floor(&self, x: i32, y: i32) -> bool {
        self.cell(x, y) == Some(Cell::Floor)
    }

    /// The floor cell closest (Manhattan distance) to `(x, y)`.
    ///
    /// Ties go to the first cell in row-major order.
    pub fn nearest_floor(&self, x: i32, y: i32) -> Option<(i32, i32)> {
        let mut best: Option<((i32, i32), u32)> = None;
        for cy in 0..self.height as i32 {
            for cx in 0..self.width as i32 {
                if !self.is_floor(cx, cy) {
                    continue;
                }
                let d = cx.abs_diff(x) + cy.abs_diff(y);
                if best.is_none_or(|(_, bd)| d < bd) {
                    best = Some(((cx, cy), d));
                }
            }
        }
        best.map(|(pos, _)| pos)
    }
}

/// Client → Server: step one cell in `direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub direction: Direction,
}

/// One registered component value, still encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentBlob {
    pub tag: TypeTag,
    pub body: Vec<u8>,
}

/// The complete component set of one entity as of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity: EntityId,
    pub components: Vec<ComponentBlob>,
}

/// Server → Client on the replication channel: everything that changed in
/// one simulation tick.
///
/// Each listed entity carries its full component set, so applying a batch
/// never leaves an entity half-updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationBatch {
    pub tick: u64,
    pub server_time: u64,
    /// `true` when this batch is a full snapshot (first batch of a
    /// subscription): entities absent from it no longer exist.
    pub full: bool,
    pub entities: Vec<EntityState>,
    pub removed: Vec<EntityId>,
}

// ---------------------------------------------------------------------------
// Wire declarations
// ---------------------------------------------------------------------------

wire_type!(Handshake, 1);
wire_type!(HandshakeAccepted, 2);
wire_type!(HandshakeRejected, 3);
wire_type!(IdentityAnnounce, 10);
wire_type!(EntityAssigned, 11);
wire_type!(ClockPing, 12);
wire_type!(ServerTime, 13);
wire_type!(MapData, 14);
wire_type!(MoveIntent, 15);
wire_type!(ReplicationBatch, 20, Channel::Replication);

#[cfg(test)]
mod tests {
    use mazenet_transport::Delivery;

    use super::*;
    use crate::WireType;

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId(7).to_string(), "E-7");
    }

    #[test]
    fn test_type_tag_display() {
        assert_eq!(TypeTag(12).to_string(), "#12");
    }

    #[test]
    fn test_channel_default_is_control() {
        assert_eq!(Channel::default(), Channel::Control);
    }

    #[test]
    fn test_channel_maps_to_lane() {
        assert_eq!(Lane::from(Channel::Control), Lane::Control);
        assert_eq!(Lane::from(Channel::Replication), Lane::Replication);
    }

    #[test]
    fn test_replication_batch_rides_replication_channel() {
        assert_eq!(ReplicationBatch::CHANNEL, Channel::Replication);
        assert_eq!(MoveIntent::CHANNEL, Channel::Control);
        assert_eq!(MoveIntent::DELIVERY, Delivery::Reliable);
    }

    #[test]
    fn test_direction_deltas() {
        assert_eq!(Direction::North.delta(), (0, -1));
        assert_eq!(Direction::South.delta(), (0, 1));
        assert_eq!(Direction::East.delta(), (1, 0));
        assert_eq!(Direction::West.delta(), (-1, 0));
    }

    #[test]
    fn test_walled_map_has_wall_border_and_floor_inside() {
        let map = MapData::walled(4, 3);

        assert!(map.is_consistent());
        assert_eq!(map.cell(0, 0), Some(Cell::Wall));
        assert_eq!(map.cell(3, 2), Some(Cell::Wall));
        assert!(map.is_floor(1, 1));
        assert!(map.is_floor(2, 1));
        assert!(!map.is_floor(1, 2));
    }

    #[test]
    fn test_cell_outside_grid_is_none() {
        let map = MapData::walled(3, 3);
        assert_eq!(map.cell(-1, 0), None);
        assert_eq!(map.cell(3, 0), None);
        assert_eq!(map.cell(0, 3), None);
    }

    #[test]
    fn test_nearest_floor_prefers_the_cell_itself() {
        let map = MapData::walled(5, 5);
        assert_eq!(map.nearest_floor(2, 2), Some((2, 2)));
        assert_eq!(map.nearest_floor(0, 0), Some((1, 1)));
    }

    #[test]
    fn test_nearest_floor_on_all_wall_map_is_none() {
        let map = MapData::walled(2, 2);
        assert_eq!(map.nearest_floor(0, 0), None);
    }

    #[test]
    fn test_inconsistent_map_is_detected() {
        let map = MapData {
            width: 3,
            height: 3,
            cells: vec![Cell::Floor; 4],
        };
        assert!(!map.is_consistent());
    }

    #[test]
    fn test_map_cell_on_wide_grid_does_not_overflow() {
        let map = MapData {
            width: u32::MAX,
            height: 2,
            cells: Vec::new(),
        };

        assert_eq!(map.cell(5, 1), None);
        assert!(!map.is_consistent());
    }

    #[test]
    fn test_map_walled_indexes_row_major() {
        let map = MapData::walled(4, 3);

        assert!(map.is_consistent());
        assert_eq!(map.cell(1, 1), Some(Cell::Floor));
        assert_eq!(map.cell(3, 1), Some(Cell::Wall));
        assert_eq!(map.cell(4, 1), None);
    }
}
