mod support;

use bindrpc_core::{
    ErrorCode, ExceptionDescriptor, InterfaceId, PROTOCOL_VERSION, TypeId,
    protocol::{TYPEID_BYTES, TYPEID_STREAM, TYPEID_VOID},
};
use bindrpc_dispatch::{DispatchError, MethodResult, SessionField, Value};
use bindrpc_wire::{CodecError, ContentStream, Input, Output, Registered, Serializable};
use support::{
    AddRequest, LOGIN_INTERFACE, LoginRequest, SessionRef, Stats, WhoAmIRequest, encode_request,
    protocol,
};

#[test]
fn login_request_layout_and_round_trip() {
    let protocol = protocol();
    let request = LoginRequest {
        user_name: "alice".to_owned(),
        user_pwd: "secret".to_owned(),
    };
    let bytes = encode_request(&protocol, &request);

    assert_eq!(&bytes[..8], &PROTOCOL_VERSION.to_le_bytes());
    assert_eq!(&bytes[8..12], &70001u32.to_le_bytes());
    assert_eq!(&bytes[12..16], &1983670399u32.to_le_bytes());
    assert_eq!(&bytes[16..20], &5u32.to_le_bytes());
    assert_eq!(&bytes[20..25], b"alice");

    let decoded = protocol
        .decode_request(&bytes)
        .expect("login request should decode");
    assert_eq!(decoded.interface_id(), LOGIN_INTERFACE);
    assert_eq!(decoded.result_type_id(), TYPEID_BYTES);
    assert_eq!(decoded.downcast_ref::<LoginRequest>(), Some(&request));
}

#[test]
fn empty_strings_round_trip() {
    let protocol = protocol();
    let request = LoginRequest::default();
    let decoded = protocol
        .decode_request(&encode_request(&protocol, &request))
        .expect("empty login should decode");
    assert_eq!(decoded.downcast_ref::<LoginRequest>(), Some(&request));
}

#[test]
fn interface_mismatch_is_detected() {
    let protocol = protocol();
    let mut bytes = encode_request(&protocol, &AddRequest { a: 1, b: 2 });
    bytes[12..16].copy_from_slice(&7u32.to_le_bytes());
    let err = protocol
        .decode_request(&bytes)
        .err()
        .expect("wrong interface must fail");
    assert_eq!(
        err,
        DispatchError::Codec(CodecError::InterfaceMismatch {
            position: 12,
            expected: InterfaceId(42),
            actual: InterfaceId(7),
        })
    );
}

#[test]
fn unknown_request_type_is_reported() {
    let protocol = protocol();
    let mut bytes = encode_request(&protocol, &AddRequest { a: 1, b: 2 });
    bytes[8..12].copy_from_slice(&99_999u32.to_le_bytes());
    let err = protocol
        .decode_request(&bytes)
        .err()
        .expect("unknown type must fail");
    assert_eq!(
        err,
        DispatchError::Codec(CodecError::UnknownTypeId {
            position: 8,
            type_id: TypeId(99_999),
        })
    );
    assert_eq!(ExceptionDescriptor::from(&err).code, ErrorCode::Corrupt);
}

#[test]
fn registered_non_request_type_is_unsupported_method() {
    let protocol = protocol();
    let mut out = protocol.output(PROTOCOL_VERSION);
    out.put_object(&Stats::default()).expect("stats should encode");
    let err = protocol
        .decode_request(&out.into_bytes())
        .err()
        .expect("stats is not a request");
    assert_eq!(err, DispatchError::NotAMethod { type_id: TypeId(70100) });
    assert_eq!(
        ExceptionDescriptor::from(err).code,
        ErrorCode::UnsupportedMethod
    );
}

#[test]
fn trailing_bytes_after_request_are_rejected() {
    let protocol = protocol();
    let mut bytes = encode_request(&protocol, &AddRequest { a: 1, b: 2 });
    bytes.extend_from_slice(&[0, 0]);
    assert!(matches!(
        protocol.decode_request(&bytes),
        Err(DispatchError::Codec(CodecError::TrailingBytes { remaining: 2, .. }))
    ));
}

#[test]
fn exception_result_carries_no_payload() {
    let protocol = protocol();
    let result = MethodResult::exception(
        Stats::TYPE_ID,
        ExceptionDescriptor::remote("service down").with_detail("retry later"),
    );
    let bytes = protocol
        .encode_result(&result)
        .expect("exception should encode")
        .bytes;
    assert_eq!(bytes[12], 1);

    let back = protocol.decode_result(&bytes).expect("result should decode");
    assert_eq!(back.type_id(), Stats::TYPE_ID);
    assert!(back.value().is_none());
    let exc = back.exception_ref().expect("exception should survive");
    assert_eq!(exc.code, ErrorCode::RemoteError);
    assert_eq!(exc.detail.as_deref(), Some("retry later"));
}

#[test]
fn void_result_has_no_payload_bytes() {
    let protocol = protocol();
    let bytes = protocol
        .encode_result(&MethodResult::ok(TYPEID_VOID, Value::Void))
        .expect("void should encode")
        .bytes;
    assert_eq!(bytes.len(), 8 + 4 + 1);
    assert_eq!(bytes[12], 0);
    let back = protocol.decode_result(&bytes).expect("void should decode");
    assert!(matches!(back.value(), Some(Value::Void)));
}

#[test]
fn object_and_null_results_round_trip() {
    let protocol = protocol();
    let stats = Stats {
        calls: 3,
        last_op: String::new(),
    };
    for value in [Value::object(stats.clone()), Value::null()] {
        let expect_some = matches!(value, Value::Object(Some(_)));
        let bytes = protocol
            .encode_result(&MethodResult::ok(TypeId(70100), value))
            .expect("object result should encode")
            .bytes;
        let back = protocol
            .decode_result(&bytes)
            .expect("object result should decode")
            .into_outcome()
            .expect("result should be a value");
        if expect_some {
            assert_eq!(back.into_object::<Stats>(), Some(stats.clone()));
        } else {
            assert!(matches!(back, Value::Object(None)));
        }
    }
}

#[test]
fn stream_result_hands_body_to_transport() {
    let protocol = protocol();
    let result = MethodResult::ok(
        TYPEID_STREAM,
        Value::Stream(ContentStream::from_bytes("text/csv", b"a,b\n".to_vec())),
    );
    let encoded = protocol
        .encode_result(&result)
        .expect("stream result should encode");
    assert_eq!(encoded.streams.len(), 1);

    let back = protocol
        .decode_result(&encoded.bytes)
        .expect("stream descriptor should decode");
    match back.value() {
        Some(Value::Stream(stream)) => {
            assert_eq!(stream.content_type(), "text/csv");
            assert_eq!(stream.content_length(), Some(4));
            assert_eq!(stream.stream_id(), Some(encoded.streams[0].stream_id));
        }
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn corrupt_exception_flag_is_rejected() {
    let protocol = protocol();
    let mut out = Output::new(PROTOCOL_VERSION);
    out.put_type_id(TYPEID_VOID);
    out.put_u8(7);
    assert!(matches!(
        protocol.decode_result(&out.into_bytes()),
        Err(CodecError::InvalidValue { position: 12, expected: "bool", .. })
    ));
}

#[test]
fn session_placeholder_is_written_and_dropped_on_decode() {
    let protocol = protocol();
    let request = WhoAmIRequest {
        session: SessionField::with_reference(SessionRef {
            token: "caller-side".to_owned(),
        }),
    };
    let bytes = encode_request(&protocol, &request);
    assert_eq!(&bytes[16..20], &SessionRef::TYPE_ID.0.to_le_bytes());
    assert_eq!(&bytes[20..24], &11u32.to_le_bytes());

    let decoded = protocol
        .decode_request(&bytes)
        .expect("session-bearing request should decode");
    let whoami = decoded
        .downcast_ref::<WhoAmIRequest>()
        .expect("decoded request should be whoami");
    assert!(whoami.session.reference().is_none());
    assert!(whoami.session.session().is_none());

    let anonymous = encode_request(&protocol, &WhoAmIRequest::default());
    assert_eq!(&anonymous[16..], &0u32.to_le_bytes());
}

/// Only known to the caller.
#[derive(Debug, Default)]
struct ForeignSessionRef;

impl Serializable for ForeignSessionRef {
    fn wire_type_id(&self) -> TypeId {
        TypeId(70999)
    }

    fn write(&self, _out: &mut Output) -> Result<(), CodecError> {
        Ok(())
    }

    fn read(&mut self, _input: &mut Input<'_>) -> Result<(), CodecError> {
        Ok(())
    }
}

#[test]
fn unknown_session_placeholder_type_is_rejected() {
    let protocol = protocol();
    let bytes = encode_request(
        &protocol,
        &WhoAmIRequest {
            session: SessionField::with_reference(ForeignSessionRef),
        },
    );
    assert!(matches!(
        protocol.decode_request(&bytes),
        Err(DispatchError::Codec(CodecError::UnknownTypeId {
            position: 16,
            type_id: TypeId(70999),
        }))
    ));
}
