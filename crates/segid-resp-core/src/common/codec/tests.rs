use super::*;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};

fn decode_all(codec: &mut RespCodec, input: &[u8]) -> Result<Vec<Request>> {
    let mut buf = BytesMut::from(input);
    let mut requests = Vec::new();
    while let Some(request) = codec.decode(&mut buf)? {
        requests.push(request);
    }
    Ok(requests)
}

fn encode(reply: Reply) -> BytesMut {
    let mut out = BytesMut::new();
    RespCodec::default().encode(reply, &mut out).unwrap();
    out
}

fn small_limits() -> Limits {
    Limits {
        max_array_len: 4,
        max_bulk_len: 16,
        max_inline_len: 32,
    }
}

#[test]
fn decodes_a_multibulk_command() {
    let mut codec = RespCodec::default();
    let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$6\r\norders\r\n$2\r\n10\r\n"[..]);

    let request = codec.decode(&mut buf).unwrap().unwrap();
    assert!(request.is_command("set"));
    assert_eq!(request.args(), &[Bytes::from("orders"), Bytes::from("10")]);
    assert!(buf.is_empty());
}

#[test]
fn bulk_arguments_may_hold_any_bytes() {
    let mut codec = RespCodec::default();
    let requests = decode_all(&mut codec, b"*2\r\n$3\r\nGET\r\n$4\r\na\r\nb\r\n").unwrap();
    assert_eq!(requests[0].arg(0).unwrap(), &b"a\r\nb"[..]);
}

#[test]
fn waits_for_a_partial_frame() {
    let input = b"*2\r\n$3\r\nGET\r\n$6\r\norders\r\n";
    let mut codec = RespCodec::default();
    let mut buf = BytesMut::new();

    for (i, byte) in input.iter().enumerate() {
        buf.put_u8(*byte);
        let decoded = codec.decode(&mut buf).unwrap();
        if i + 1 < input.len() {
            assert!(decoded.is_none(), "decoded early at byte {i}");
        } else {
            assert_eq!(decoded.unwrap().arg(0).unwrap(), "orders");
        }
    }
}

#[test]
fn resumes_a_partial_multibulk_where_it_stopped() {
    let mut codec = RespCodec::default();
    let mut buf = BytesMut::from(&b"*3\r\n$3\r\nSET\r\n$6\r\norders\r\n$2\r\n1"[..]);

    assert!(codec.decode(&mut buf).unwrap().is_none());
    let partial = codec.partial.as_ref().unwrap();
    assert_eq!(partial.parts.len(), 2);
    assert_eq!(partial.pos, buf.len() - 5);

    buf.extend_from_slice(b"0\r\n*1\r\n$4\r\nPI");
    let request = codec.decode(&mut buf).unwrap().unwrap();
    assert!(request.is_command("SET"));
    assert_eq!(request.args(), &[Bytes::from("orders"), Bytes::from("10")]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert_eq!(codec.partial.as_ref().unwrap().parts.len(), 0);

    buf.extend_from_slice(b"NG\r\n");
    assert!(codec.decode(&mut buf).unwrap().unwrap().is_command("PING"));
    assert!(codec.partial.is_none());
    assert!(buf.is_empty());
}

#[test]
fn decodes_pipelined_commands_in_order() {
    let mut codec = RespCodec::default();
    let requests = decode_all(
        &mut codec,
        b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\n*1\r\n$4\r\nPING\r\n",
    )
    .unwrap();

    let names: Vec<_> = requests.iter().map(Request::command_name).collect();
    assert_eq!(names, ["GET", "GET", "PING"]);
    assert_eq!(requests[1].arg(0).unwrap(), "b");
}

#[test]
fn decodes_inline_commands() {
    let mut codec = RespCodec::default();
    let requests = decode_all(&mut codec, b"PING\r\nget   orders\n  \r\nSET k  5\r\n").unwrap();

    assert_eq!(requests.len(), 3);
    assert!(requests[0].is_command("PING"));
    assert!(requests[0].args().is_empty());
    assert_eq!(requests[1].arg(0).unwrap(), "orders");
    assert_eq!(requests[2].args(), &[Bytes::from("k"), Bytes::from("5")]);
}

#[test]
fn skips_empty_and_null_arrays() {
    let mut codec = RespCodec::default();
    let requests = decode_all(&mut codec, b"*0\r\n*-1\r\n*1\r\n$4\r\nPING\r\n").unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].is_command("PING"));
}

#[test]
fn rejects_non_bulk_elements() {
    let mut codec = RespCodec::default();
    let err = decode_all(&mut codec, b"*1\r\n:5\r\n").unwrap_err();
    assert!(err.is_protocol());
    assert!(err.to_string().contains("expected '$'"), "{err}");
}

#[test]
fn rejects_malformed_lengths() {
    let inputs: [&[u8]; 5] = [
        b"*x\r\n",
        b"*1\r\n$-1\r\n",
        b"*1\r\n$abc\r\n",
        b"*1\r\n$3\r\nGETXX",
        b"*123456789012345678901234567890123456789",
    ];
    for input in inputs {
        let mut codec = RespCodec::default();
        assert!(
            decode_all(&mut codec, input).unwrap_err().is_protocol(),
            "accepted {:?}",
            input.escape_ascii().to_string()
        );
    }
}

#[test]
fn enforces_limits_before_buffering() {
    let mut codec = RespCodec::new(small_limits());

    // Announced sizes are rejected even though the payload never arrives.
    assert!(decode_all(&mut codec, b"*5\r\n").unwrap_err().is_protocol());
    assert!(
        decode_all(&mut codec, b"*1\r\n$17\r\n")
            .unwrap_err()
            .is_protocol()
    );
    assert!(
        decode_all(&mut codec, &[b'a'; 40])
            .unwrap_err()
            .is_protocol()
    );

    // At the limit is fine.
    let ok = decode_all(
        &mut codec,
        b"*4\r\n$16\r\n0123456789abcdef\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
    )
    .unwrap();
    assert_eq!(ok[0].len(), 4);
}

#[test]
fn encodes_replies() {
    assert_eq!(&encode(Reply::ok())[..], b"+OK\r\n");
    assert_eq!(&encode(Reply::error("ERR nope"))[..], b"-ERR nope\r\n");
    assert_eq!(&encode(Reply::Integer(-42))[..], b":-42\r\n");
    assert_eq!(&encode(Reply::bulk("1001"))[..], b"$4\r\n1001\r\n");
    assert_eq!(&encode(Reply::bulk(""))[..], b"$0\r\n\r\n");
    assert_eq!(&encode(Reply::nil())[..], b"$-1\r\n");
}

#[test]
fn status_and_error_lines_never_contain_line_breaks() {
    assert_eq!(&encode(Reply::status("a\r\nb"))[..], b"+a  b\r\n");
    assert_eq!(&encode(Reply::error("bad\nthing"))[..], b"-bad thing\r\n");
}

#[test]
fn client_codec_encodes_multibulk() {
    let mut out = BytesMut::new();
    RespClientCodec::default()
        .encode(Request::from_parts(["SET", "orders", "7"]).unwrap(), &mut out)
        .unwrap();
    assert_eq!(&out[..], b"*3\r\n$3\r\nSET\r\n$6\r\norders\r\n$1\r\n7\r\n");
}

#[test]
fn client_codec_decodes_every_reply_shape() {
    let mut codec = RespClientCodec::default();
    let mut buf = BytesMut::from(&b"+OK\r\n-ERR x\r\n:12\r\n$-1\r\n$3\r\nabc\r\n$5\r\nab"[..]);

    let mut replies = Vec::new();
    while let Some(reply) = codec.decode(&mut buf).unwrap() {
        replies.push(reply);
    }
    assert_eq!(
        replies,
        vec![
            Reply::ok(),
            Reply::error("ERR x"),
            Reply::Integer(12),
            Reply::nil(),
            Reply::bulk("abc"),
        ]
    );

    // The truncated bulk completes once the rest arrives.
    buf.extend_from_slice(b"cde\r\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Reply::bulk("abcde")));
}

#[tokio::test]
async fn codecs_talk_to_each_other_over_a_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (client_read, client_write) = tokio::io::split(client);

    let mut requests = FramedRead::new(server_read, RespCodec::default());
    let mut replies = FramedWrite::new(server_write, RespCodec::default());
    let mut outbound = FramedWrite::new(client_write, RespClientCodec::default());
    let mut inbound = FramedRead::new(client_read, RespClientCodec::default());

    outbound
        .send(Request::from_parts(["GET", "orders"]).unwrap())
        .await
        .unwrap();

    let request = requests.next().await.unwrap().unwrap();
    assert!(request.is_command("GET"));
    replies.send(Reply::Integer(1)).await.unwrap();

    assert_eq!(inbound.next().await.unwrap().unwrap(), Reply::Integer(1));
}
