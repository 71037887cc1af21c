//! Tests for protocol message encoding

use super::*;

fn coord(value: u8) -> Coord {
    Coord::new(value).unwrap()
}

#[test]
fn test_setup_and_start_roundtrip() {
    for symbol in [Cell::X, Cell::O] {
        for msg in [Message::Setup { symbol }, Message::Start { symbol }] {
            assert_eq!(Message::decode(&msg.encode()), Ok(msg));
        }
    }
}

#[test]
fn test_play_messages_roundtrip_all_cells() {
    for x in Coord::all() {
        for y in Coord::all() {
            let request = Message::PlayRequest { x, y };
            assert_eq!(Message::decode(&request.encode()), Ok(request));

            for valid in [true, false] {
                let result = Message::PlayResult { valid, x, y };
                assert_eq!(Message::decode(&result.encode()), Ok(result));
            }
        }
    }
}

#[test]
fn test_wire_layout() {
    assert_eq!(Message::Setup { symbol: Cell::O }.encode(), vec![0, 2]);
    assert_eq!(Message::Start { symbol: Cell::X }.encode(), vec![1, 1]);
    assert_eq!(
        Message::PlayRequest {
            x: coord(2),
            y: coord(0)
        }
        .encode(),
        vec![2, 2, 0]
    );
    assert_eq!(
        Message::PlayResult {
            valid: true,
            x: coord(1),
            y: coord(2)
        }
        .encode(),
        vec![3, 1, 1, 2]
    );
}

#[test]
fn test_decode_empty() {
    assert_eq!(Message::decode(&[]), Err(DecodeError::Empty));
}

#[test]
fn test_decode_unknown_type() {
    assert_eq!(Message::decode(&[4, 0, 0]), Err(DecodeError::UnknownType(4)));
    assert_eq!(
        Message::decode(&[0xFF]),
        Err(DecodeError::UnknownType(0xFF))
    );
}

#[test]
fn test_decode_truncated() {
    assert_eq!(
        Message::decode(&[0]),
        Err(DecodeError::Truncated { field: "symbol" })
    );
    assert_eq!(
        Message::decode(&[2, 1]),
        Err(DecodeError::Truncated { field: "y" })
    );
    assert_eq!(
        Message::decode(&[3]),
        Err(DecodeError::Truncated { field: "valid" })
    );
    assert_eq!(
        Message::decode(&[3, 1, 0]),
        Err(DecodeError::Truncated { field: "y" })
    );
}

#[test]
fn test_decode_out_of_range_coordinates() {
    assert_eq!(
        Message::decode(&[2, 3, 0]),
        Err(DecodeError::OutOfRange {
            field: "x",
            value: 3
        })
    );
    assert_eq!(
        Message::decode(&[3, 0, 1, 9]),
        Err(DecodeError::OutOfRange {
            field: "y",
            value: 9
        })
    );
}

#[test]
fn test_decode_invalid_symbol_and_bool() {
    assert_eq!(Message::decode(&[0, 0]), Err(DecodeError::InvalidSymbol(0)));
    assert_eq!(Message::decode(&[1, 7]), Err(DecodeError::InvalidSymbol(7)));
    assert_eq!(Message::decode(&[3, 2, 0, 0]), Err(DecodeError::InvalidBool(2)));
}

#[test]
fn test_decode_trailing_bytes() {
    assert_eq!(
        Message::decode(&[2, 0, 0, 0]),
        Err(DecodeError::TrailingBytes(1))
    );
}

#[test]
fn test_message_type() {
    let msg = Message::PlayResult {
        valid: false,
        x: coord(0),
        y: coord(0),
    };
    assert_eq!(msg.message_type(), MessageType::PlayResult);
    assert_eq!(MessageType::try_from(1), Ok(MessageType::Start));
}

#[test]
fn test_decode_error_display() {
    let err = DecodeError::OutOfRange {
        field: "x",
        value: 5,
    };
    assert!(err.to_string().contains("x out of range"));
}
