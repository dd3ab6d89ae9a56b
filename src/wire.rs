use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// End-of-list marker the coordinator sends after the last peer notification.
pub const END_OF_LIST: &str = "n";

/// One coordinator→peer notification during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Peer { addr: String, port: u16 },
    EndOfList,
}

/// Reads one newline-delimited frame. Returns `None` on end-of-stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        return Ok(Some(trimmed.to_string()));
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Parses a decimal listening port. Zero is rejected along with garbage since
/// a peer cannot be reached on port 0.
pub fn parse_port(frame: &str) -> io::Result<u16> {
    match frame.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid port frame: {frame:?}"),
        )),
    }
}

/// Reads the next notification from the coordinator: either the sentinel or an
/// address frame followed by a port frame. `None` means the coordinator closed
/// the stream before completing the list.
pub async fn read_notification<R>(reader: &mut R) -> io::Result<Option<Notification>>
where
    R: AsyncBufRead + Unpin,
{
    let addr = match read_frame(reader).await? {
        Some(frame) => frame,
        None => return Ok(None),
    };

    if addr == END_OF_LIST {
        return Ok(Some(Notification::EndOfList));
    }

    let port_frame = match read_frame(reader).await? {
        Some(frame) => frame,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed between address and port frames",
            ));
        }
    };

    let port = parse_port(&port_frame)?;
    Ok(Some(Notification::Peer { addr, port }))
}

pub async fn write_notification<W>(writer: &mut W, notification: &Notification) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match notification {
        Notification::Peer { addr, port } => {
            write_frame(writer, addr).await?;
            write_frame(writer, &port.to_string()).await?;
        }
        Notification::EndOfList => {
            write_frame(writer, END_OF_LIST).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip_preserves_bytes() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_frame(&mut writer, "hello mesh").await.expect("write frame");
        let frame = read_frame(&mut reader)
            .await
            .expect("read frame")
            .expect("expected a frame");

        assert_eq!(frame, "hello mesh");
    }

    #[tokio::test]
    async fn read_frame_skips_blank_lines_and_reports_eof() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"\r\n\nping\n").await.expect("write bytes");
        drop(writer);

        let frame = read_frame(&mut reader).await.expect("read frame");
        assert_eq!(frame.as_deref(), Some("ping"));
        let eof = read_frame(&mut reader).await.expect("read at eof");
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn notification_roundtrip() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        let peer = Notification::Peer {
            addr: "127.0.0.1".to_string(),
            port: 9001,
        };
        write_notification(&mut writer, &peer).await.expect("write peer");
        write_notification(&mut writer, &Notification::EndOfList)
            .await
            .expect("write sentinel");

        let first = read_notification(&mut reader)
            .await
            .expect("read peer")
            .expect("expected peer");
        assert_eq!(first, peer);

        let second = read_notification(&mut reader)
            .await
            .expect("read sentinel")
            .expect("expected sentinel");
        assert_eq!(second, Notification::EndOfList);
    }

    #[tokio::test]
    async fn truncated_notification_is_an_error() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_frame(&mut writer, "127.0.0.1").await.expect("write addr");
        drop(writer);

        let err = read_notification(&mut reader)
            .await
            .expect_err("address without port should error");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn parse_port_rejects_garbage() {
        assert_eq!(parse_port("9001").expect("valid port"), 9001);
        assert!(parse_port("not-a-port").is_err());
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
    }
}
