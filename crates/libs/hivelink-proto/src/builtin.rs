//! Built-in Hivelink v1 protocol tables.
//!
//! Generated from `message_definitions.csv` and the payload enum table.
//! Order is significant: ordinals are assigned from position.

use crate::schema::{
    CategoryDef, DataType, EnumDef, EnumMember, FieldSpec, MessageDef, Schema, SchemaDescription,
    SchemaError, SubcategoryDef,
};

pub const PROTOCOL_NAME: &str = "test";
pub const PROTOCOL_VERSION: u32 = 1;

pub fn schema() -> Result<Schema, SchemaError> {
    Schema::build(&description())
}

pub fn description() -> SchemaDescription {
    SchemaDescription {
        name: PROTOCOL_NAME.to_string(),
        version: PROTOCOL_VERSION,
        categories: vec![
            category("Heartbeat", vec![subcategory("System", vec![message("HEARTBEAT", vec![])])]),
            category(
                "Testing",
                vec![subcategory(
                    "System",
                    vec![
                        message("TEXTMSG", vec![field("textdata", DataType::String)]),
                        message("BINMSG", vec![field("data", DataType::Bytes)]),
                    ],
                )],
            ),
            category(
                "Network",
                vec![subcategory(
                    "System",
                    vec![
                        message("ONLINE", vec![]),
                        message("FIND", vec![field("id", DataType::Bytes)]),
                        message("PING", vec![]),
                    ],
                )],
            ),
            category(
                "Reply",
                vec![
                    subcategory(
                        "Network",
                        vec![
                            message("ACK", vec![]),
                            message(
                                "FIND",
                                vec![
                                    field("found", DataType::Bool),
                                    field("intf", DataType::Bytes).bitmask(),
                                    field("loss", DataType::Int),
                                    field("latency", DataType::Int),
                                    field("rssi", DataType::Int),
                                    field("snr", DataType::Int),
                                ],
                            ),
                        ],
                    ),
                    subcategory(
                        "Command",
                        vec![message("RESULT", vec![field("CommandResult", DataType::Enum)])],
                    ),
                ],
            ),
            category(
                "Status",
                vec![
                    subcategory(
                        "System",
                        vec![
                            message(
                                "FLIGHT",
                                vec![
                                    field("FlightMode", DataType::Enum),
                                    field("airspeed", DataType::Int),
                                    field("groundspeed", DataType::Int),
                                    field("heading", DataType::Int),
                                    field("msl_alt", DataType::Int),
                                    field("lat", DataType::Int),
                                    field("lon", DataType::Int),
                                ],
                            ),
                            message(
                                "POSITION",
                                vec![field("lat", DataType::Int), field("lon", DataType::Int)],
                            ),
                        ],
                    ),
                    subcategory(
                        "AP",
                        vec![message(
                            "HL_TELEM",
                            vec![
                                field("mode_str", DataType::String),
                                field("airspeed", DataType::Int),
                                field("groundspeed", DataType::Int),
                                field("heading", DataType::Int),
                                field("msl_alt", DataType::Int),
                                field("lat", DataType::Int),
                                field("lon", DataType::Int),
                            ],
                        )],
                    ),
                    subcategory(
                        "INAV",
                        vec![message(
                            "TELEM",
                            vec![
                                field("inavmodes", DataType::Int),
                                field("airspeed", DataType::Int),
                                field("groundspeed", DataType::Int),
                                field("heading", DataType::Int),
                                field("msl_alt", DataType::Int),
                                field("lat", DataType::Int),
                                field("lon", DataType::Int),
                            ],
                        )],
                    ),
                ],
            ),
            category(
                "Command",
                vec![
                    subcategory(
                        "System",
                        vec![
                            message("ACTIVATE", vec![]),
                            message("SHUTDOWN", vec![]),
                            message("SET_FLIGHT_MODE", vec![]),
                            message("SWITCH_DATALINK", vec![]),
                            message("DATALINK_CONFIG", vec![]),
                        ],
                    ),
                    subcategory(
                        "AP",
                        vec![
                            message("ARM", vec![]),
                            message("DISARM", vec![]),
                            message("SET_MODE", vec![field("mode_str", DataType::Bytes)]),
                            message("TAKEOFF", vec![field("alt_m", DataType::Int)]),
                            message("LAND", vec![]),
                            message("SELECT_MISSION", vec![field("seq", DataType::Int)]),
                        ],
                    ),
                ],
            ),
        ],
        enums: vec![
            payload_enum(
                "CommandResult",
                &[
                    ("ACCEPTED", 1),
                    ("TEMPORARILY_REJECTED", 2),
                    ("DENIED", 3),
                    ("UNSUPPORTED", 4),
                    ("FAILED", 5),
                    ("IN_PROGRESS", 6),
                    ("CANCELLED", 7),
                ],
            ),
            payload_enum(
                "DataError",
                &[
                    ("NOT_FOUND", 1),
                    ("DEVICE_UNAVAILABLE", 2),
                    ("HARDWARE_ERROR", 3),
                    ("SOFTWARE_ERROR", 4),
                    ("DATABASE_ERROR", 5),
                ],
            ),
            payload_enum(
                "FlightMode",
                &[
                    ("ACRO", 1),
                    ("ANGLE", 2),
                    ("POSHOLD", 3),
                    ("NAV_WP", 4),
                    ("LOITER", 5),
                    ("CRUSE", 6),
                    ("RTH", 7),
                    ("LANDING", 8),
                    ("DISARMED", 9),
                ],
            ),
            payload_enum(
                "FlightPhase",
                &[
                    ("PREFLIGHT", 1),
                    ("TAKEOFF", 2),
                    ("CRUISE", 3),
                    ("MISSION_OPERATION", 4),
                    ("RTB", 5),
                    ("LANDING", 6),
                    ("POSTFLIGHT", 7),
                ],
            ),
            payload_enum(
                "MissionPhase",
                &[
                    ("BOOTING", 1),
                    ("ONLINE", 2),
                    ("MISSION_RECEIVED", 3),
                    ("READY_TAKEOFF", 4),
                    ("TAKEOFF_COMPLETE", 5),
                    ("ENROUTE", 6),
                    ("AT_ASSEMBLY", 7),
                    ("HOLDING", 8),
                    ("PROCEEDING", 9),
                    ("BINGO", 10),
                    ("RTB", 11),
                    ("LANDING", 12),
                    ("LANDED", 13),
                    ("SHUTDOWN", 14),
                ],
            ),
        ],
    }
}

fn category(name: &str, subcategories: Vec<SubcategoryDef>) -> CategoryDef {
    CategoryDef { name: name.to_string(), subcategories }
}

fn subcategory(name: &str, messages: Vec<MessageDef>) -> SubcategoryDef {
    SubcategoryDef { name: name.to_string(), messages }
}

fn message(name: &str, fields: Vec<FieldSpec>) -> MessageDef {
    MessageDef { name: name.to_string(), fields }
}

fn field(name: &str, datatype: DataType) -> FieldSpec {
    FieldSpec::new(name, datatype)
}

fn payload_enum(name: &str, members: &[(&str, i64)]) -> EnumDef {
    EnumDef {
        name: name.to_string(),
        members: members
            .iter()
            .map(|(member, value)| EnumMember { name: member.to_string(), value: *value })
            .collect(),
    }
}
