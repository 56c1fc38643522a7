//! Byte encoding of the messages exchanged between workers.
//!
//! Everything is little endian. Event lists and box layouts carry the number of
//! dimensions so that a worker compiled for a different output space is caught at decode.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::constants::{LAYOUT_MAGIC, NODE_KIND_GRID, NODE_KIND_LEAF};
use super::error::CodecError;
use super::event::MDEvent;
use super::extent::Extent;
use super::layout::{BoxLayout, LayoutKind, LayoutNode, LayoutSummary};

/// Events bound for one box
pub type EventBundle<const ND: usize> = (u64, Vec<MDEvent<ND>>);

fn write_event<const ND: usize>(buffer: &mut Vec<u8>, event: &MDEvent<ND>) -> Result<(), CodecError> {
    for value in event.coordinates() {
        buffer.write_f64::<LittleEndian>(*value)?;
    }
    buffer.write_f64::<LittleEndian>(event.signal())?;
    buffer.write_f64::<LittleEndian>(event.error_squared())?;
    Ok(())
}

fn read_event<const ND: usize>(cursor: &mut Cursor<&[u8]>) -> Result<MDEvent<ND>, CodecError> {
    let mut coordinates = [0.0; ND];
    for value in coordinates.iter_mut() {
        *value = cursor.read_f64::<LittleEndian>()?;
    }
    let signal = cursor.read_f64::<LittleEndian>()?;
    let error_squared = cursor.read_f64::<LittleEndian>()?;
    Ok(MDEvent::new(coordinates, signal, error_squared))
}

fn write_n_dims<const ND: usize>(buffer: &mut Vec<u8>) -> Result<(), CodecError> {
    buffer.write_u32::<LittleEndian>(ND as u32)?;
    Ok(())
}

fn read_n_dims<const ND: usize>(cursor: &mut Cursor<&[u8]>) -> Result<(), CodecError> {
    let n_dims = cursor.read_u32::<LittleEndian>()?;
    if n_dims != ND as u32 {
        return Err(CodecError::DimensionMismatch(n_dims, ND as u32));
    }
    Ok(())
}

fn read_count(cursor: &mut Cursor<&[u8]>) -> Result<usize, CodecError> {
    Ok(cursor.read_u64::<LittleEndian>()? as usize)
}

fn check_consumed(cursor: &Cursor<&[u8]>) -> Result<(), CodecError> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining != 0 {
        return Err(CodecError::TrailingBytes(remaining as usize));
    }
    Ok(())
}

/// Capacity hint bounded by what the buffer could possibly hold
fn capacity_hint(cursor: &Cursor<&[u8]>, count: usize, item_bytes: usize) -> usize {
    let remaining = (cursor.get_ref().len() as u64 - cursor.position()) as usize;
    count.min(remaining / item_bytes.max(1))
}

/// Encoded size of a list of `n_events` events
pub const fn encoded_events_len<const ND: usize>(n_events: usize) -> usize {
    12 + n_events * MDEvent::<ND>::size_bytes()
}

pub fn encode_events<const ND: usize>(events: &[MDEvent<ND>]) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::with_capacity(encoded_events_len::<ND>(events.len()));
    write_n_dims::<ND>(&mut buffer)?;
    buffer.write_u64::<LittleEndian>(events.len() as u64)?;
    for event in events {
        write_event(&mut buffer, event)?;
    }
    Ok(buffer)
}

pub fn decode_events<const ND: usize>(bytes: &[u8]) -> Result<Vec<MDEvent<ND>>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    read_n_dims::<ND>(&mut cursor)?;
    let count = read_count(&mut cursor)?;
    let mut events = Vec::with_capacity(capacity_hint(&cursor, count, MDEvent::<ND>::size_bytes()));
    for _ in 0..count {
        events.push(read_event(&mut cursor)?);
    }
    check_consumed(&cursor)?;
    Ok(events)
}

pub fn encode_bundles<const ND: usize>(bundles: &[EventBundle<ND>]) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    write_n_dims::<ND>(&mut buffer)?;
    buffer.write_u64::<LittleEndian>(bundles.len() as u64)?;
    for (box_id, events) in bundles {
        buffer.write_u64::<LittleEndian>(*box_id)?;
        buffer.write_u64::<LittleEndian>(events.len() as u64)?;
        for event in events {
            write_event(&mut buffer, event)?;
        }
    }
    Ok(buffer)
}

pub fn decode_bundles<const ND: usize>(bytes: &[u8]) -> Result<Vec<EventBundle<ND>>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    read_n_dims::<ND>(&mut cursor)?;
    let n_bundles = read_count(&mut cursor)?;
    let mut bundles = Vec::with_capacity(capacity_hint(&cursor, n_bundles, 16));
    for _ in 0..n_bundles {
        let box_id = cursor.read_u64::<LittleEndian>()?;
        let count = read_count(&mut cursor)?;
        let mut events =
            Vec::with_capacity(capacity_hint(&cursor, count, MDEvent::<ND>::size_bytes()));
        for _ in 0..count {
            events.push(read_event(&mut cursor)?);
        }
        bundles.push((box_id, events));
    }
    check_consumed(&cursor)?;
    Ok(bundles)
}

/// Layout messages are: magic, dimensions, rank count, then the summary header
/// (box count, leaf count, id sum) followed by the nodes in pre-order.
pub fn encode_layout<const ND: usize>(layout: &BoxLayout<ND>) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    buffer.write_u32::<LittleEndian>(LAYOUT_MAGIC)?;
    write_n_dims::<ND>(&mut buffer)?;
    let summary = layout.summary();
    buffer.write_u64::<LittleEndian>(layout.n_ranks() as u64)?;
    buffer.write_u64::<LittleEndian>(summary.n_boxes as u64)?;
    buffer.write_u64::<LittleEndian>(summary.n_leaves as u64)?;
    buffer.write_u64::<LittleEndian>(summary.id_sum)?;
    buffer.write_u64::<LittleEndian>(layout.nodes().len() as u64)?;
    for node in layout.nodes() {
        buffer.write_u64::<LittleEndian>(node.id)?;
        buffer.write_u64::<LittleEndian>(node.depth as u64)?;
        for extent in node.extents.iter() {
            buffer.write_f64::<LittleEndian>(extent.min)?;
            buffer.write_f64::<LittleEndian>(extent.max)?;
        }
        match node.kind {
            LayoutKind::Leaf { owner } => {
                buffer.write_u8(NODE_KIND_LEAF)?;
                buffer.write_u64::<LittleEndian>(owner as u64)?;
            }
            LayoutKind::Grid { split_into } => {
                buffer.write_u8(NODE_KIND_GRID)?;
                for n in split_into {
                    buffer.write_u64::<LittleEndian>(n as u64)?;
                }
            }
        }
    }
    Ok(buffer)
}

pub fn decode_layout<const ND: usize>(bytes: &[u8]) -> Result<BoxLayout<ND>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != LAYOUT_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    read_n_dims::<ND>(&mut cursor)?;
    let n_ranks = read_count(&mut cursor)?;
    let summary = LayoutSummary {
        n_boxes: read_count(&mut cursor)?,
        n_leaves: read_count(&mut cursor)?,
        id_sum: cursor.read_u64::<LittleEndian>()?,
    };
    let n_nodes = read_count(&mut cursor)?;
    let mut nodes = Vec::with_capacity(capacity_hint(&cursor, n_nodes, 17 + 16 * ND));
    for _ in 0..n_nodes {
        let id = cursor.read_u64::<LittleEndian>()?;
        let depth = read_count(&mut cursor)?;
        let mut extents = [Extent::new(0.0, 0.0); ND];
        for extent in extents.iter_mut() {
            extent.min = cursor.read_f64::<LittleEndian>()?;
            extent.max = cursor.read_f64::<LittleEndian>()?;
        }
        let kind = match cursor.read_u8()? {
            NODE_KIND_LEAF => LayoutKind::Leaf {
                owner: read_count(&mut cursor)?,
            },
            NODE_KIND_GRID => {
                let mut split_into = [0; ND];
                for n in split_into.iter_mut() {
                    *n = read_count(&mut cursor)?;
                }
                LayoutKind::Grid { split_into }
            }
            other => return Err(CodecError::BadNodeKind(other)),
        };
        nodes.push(LayoutNode {
            id,
            depth,
            extents,
            kind,
        });
    }
    check_consumed(&cursor)?;
    Ok(BoxLayout::from_parts(n_ranks, nodes, summary))
}

pub fn encode_count(count: u64) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::with_capacity(8);
    buffer.write_u64::<LittleEndian>(count)?;
    Ok(buffer)
}

pub fn decode_count(bytes: &[u8]) -> Result<u64, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u64::<LittleEndian>()?;
    check_consumed(&cursor)?;
    Ok(count)
}
