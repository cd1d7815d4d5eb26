//! Serialize/deserialize 9P messages into/from binary.
//!
//! A message on the wire is `size[4] type[1] tag[2] payload`; the leading
//! size field is handled by the length-delimited transport framing, so the
//! codec here reads and writes the `type[1] tag[2] payload` remainder.
//! All integers are little-endian. Strings are `len[2]` followed by UTF-8
//! bytes with no terminator.

use crate::{fcall::*, io_err};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{Read, Result};
use std::mem;
use std::ops::Shl;

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };

    ($typ:ident, $buf:expr) => {
        $typ::from_bits_truncate(decode!($buf))
    };
}

fn read_exact<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..]).and(Ok(buf))
}

/// A serializing specific result to overload operators on `Result`
///
/// # Overloaded operators
/// <<, ?
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper class of WriteBytesExt to provide operator overloads
/// for serializing
///
/// Operator '<<' serializes the right hand side argument into
/// the left hand side encoder
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    /// Return total bytes written
    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    /// Encode data, equivalent to: encoder << data
    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// Trait representing a type which can be serialized into binary
pub trait Encodable {
    /// Encode self to w and returns the number of bytes encoded
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self)
            .and(Ok(mem::size_of::<Self>()))
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let mut bytes = (self.len() as u16).encode(w)?;
        bytes += w.write_all(self.as_bytes()).and(Ok(self.len()))?;
        Ok(bytes)
    }
}

impl Encodable for QId {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match Encoder::new(w) << &self.typ.bits() << &self.version << &self.path {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Stat {
    /// Encodes the record in its standalone form: a `u16` length prefix
    /// followed by the body. `RStat`/`TWStat` add the enclosing prefix.
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match Encoder::new(w)
            << &self.size()
            << &self.stype
            << &self.dev
            << &self.qid
            << &self.mode
            << &self.atime
            << &self.mtime
            << &self.length
            << &self.name
            << &self.uid
            << &self.gid
            << &self.muid
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let size = self.0.len();
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(&self.0)?;
        Ok(bytes)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match self
            .iter()
            .fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s)
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        use crate::FCall::*;

        let typ = MsgType::from(&self.body);
        let buf = Encoder::new(w) << &(typ as u8) << &self.tag;

        let buf = match self.body {
            TVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            RVersion {
                ref msize,
                ref version,
            } => buf << msize << version,
            TAuth {
                ref afid,
                ref uname,
                ref aname,
            } => buf << afid << uname << aname,
            RAuth { ref aqid } => buf << aqid,
            TAttach {
                ref fid,
                ref afid,
                ref uname,
                ref aname,
            } => buf << fid << afid << uname << aname,
            RAttach { ref qid } => buf << qid,
            RError { ref ename } => buf << ename,
            TFlush { ref oldtag } => buf << oldtag,
            RFlush => buf,
            TWalk {
                ref fid,
                ref newfid,
                ref wnames,
            } => buf << fid << newfid << wnames,
            RWalk { ref wqids } => buf << wqids,
            TOpen { ref fid, ref mode } => buf << fid << mode,
            ROpen {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TCreate {
                ref fid,
                ref name,
                ref perm,
                ref mode,
            } => buf << fid << name << perm << mode,
            RCreate {
                ref qid,
                ref iounit,
            } => buf << qid << iounit,
            TRead {
                ref fid,
                ref offset,
                ref count,
            } => buf << fid << offset << count,
            RRead { ref data } => buf << data,
            TWrite {
                ref fid,
                ref offset,
                ref data,
            } => buf << fid << offset << data,
            RWrite { ref count } => buf << count,
            TClunk { ref fid } => buf << fid,
            RClunk => buf,
            TRemove { ref fid } => buf << fid,
            RRemove => buf,
            TStat { ref fid } => buf << fid,
            RStat { ref stat } => buf << &(stat.size() + 2) << stat,
            TWStat { ref fid, ref stat } => buf << fid << &(stat.size() + 2) << stat,
            RWStat => buf,
        };

        match buf {
            SResult(Ok(b)) => Ok(b.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

/// Trait representing a type which can be deserialized from binary
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        String::from_utf8(read_exact(r, len as usize)?)
            .map_err(|_| io_err!(InvalidData, "invalid UTF-8 sequence"))
    }
}

impl Decodable for QId {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(QId {
            typ: decode!(QIdType, *r),
            version: Decodable::decode(r)?,
            path: Decodable::decode(r)?,
        })
    }
}

impl Decodable for Stat {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let _size: u16 = Decodable::decode(r)?;
        Ok(Stat {
            stype: Decodable::decode(r)?,
            dev: Decodable::decode(r)?,
            qid: Decodable::decode(r)?,
            mode: Decodable::decode(r)?,
            atime: Decodable::decode(r)?,
            mtime: Decodable::decode(r)?,
            length: Decodable::decode(r)?,
            name: Decodable::decode(r)?,
            uid: Decodable::decode(r)?,
            gid: Decodable::decode(r)?,
            muid: Decodable::decode(r)?,
        })
    }
}

impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        Ok(Data(read_exact(r, len as usize)?))
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let mut buf = Vec::new();
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        use crate::MsgType::*;

        let mut buf = r;

        let msg_type = MsgType::from_u8(decode!(buf));
        let tag = decode!(buf);
        let body = match msg_type {
            Some(TVersion) => FCall::TVersion {
                msize: decode!(buf),
                version: decode!(buf),
            },
            Some(RVersion) => FCall::RVersion {
                msize: decode!(buf),
                version: decode!(buf),
            },
            Some(TAuth) => FCall::TAuth {
                afid: decode!(buf),
                uname: decode!(buf),
                aname: decode!(buf),
            },
            Some(RAuth) => FCall::RAuth { aqid: decode!(buf) },
            Some(TAttach) => FCall::TAttach {
                fid: decode!(buf),
                afid: decode!(buf),
                uname: decode!(buf),
                aname: decode!(buf),
            },
            Some(RAttach) => FCall::RAttach { qid: decode!(buf) },
            Some(RError) => FCall::RError {
                ename: decode!(buf),
            },
            Some(TFlush) => FCall::TFlush {
                oldtag: decode!(buf),
            },
            Some(RFlush) => FCall::RFlush,
            Some(TWalk) => FCall::TWalk {
                fid: decode!(buf),
                newfid: decode!(buf),
                wnames: decode!(buf),
            },
            Some(RWalk) => FCall::RWalk {
                wqids: decode!(buf),
            },
            Some(TOpen) => FCall::TOpen {
                fid: decode!(buf),
                mode: decode!(buf),
            },
            Some(ROpen) => FCall::ROpen {
                qid: decode!(buf),
                iounit: decode!(buf),
            },
            Some(TCreate) => FCall::TCreate {
                fid: decode!(buf),
                name: decode!(buf),
                perm: decode!(buf),
                mode: decode!(buf),
            },
            Some(RCreate) => FCall::RCreate {
                qid: decode!(buf),
                iounit: decode!(buf),
            },
            Some(TRead) => FCall::TRead {
                fid: decode!(buf),
                offset: decode!(buf),
                count: decode!(buf),
            },
            Some(RRead) => FCall::RRead { data: decode!(buf) },
            Some(TWrite) => FCall::TWrite {
                fid: decode!(buf),
                offset: decode!(buf),
                data: decode!(buf),
            },
            Some(RWrite) => FCall::RWrite {
                count: decode!(buf),
            },
            Some(TClunk) => FCall::TClunk { fid: decode!(buf) },
            Some(RClunk) => FCall::RClunk,
            Some(TRemove) => FCall::TRemove { fid: decode!(buf) },
            Some(RRemove) => FCall::RRemove,
            Some(TStat) => FCall::TStat { fid: decode!(buf) },
            Some(RStat) => {
                let _psize: u16 = decode!(buf);
                FCall::RStat { stat: decode!(buf) }
            }
            Some(TWStat) => {
                let fid = decode!(buf);
                let _psize: u16 = decode!(buf);
                FCall::TWStat {
                    fid,
                    stat: decode!(buf),
                }
            }
            Some(RWStat) => FCall::RWStat,
            None => return Err(io_err!(InvalidData, "invalid message type")),
        };

        Ok(Msg { tag, body })
    }
}

/// Helper function to read a 9P message from a byte-oriented stream
pub fn read_msg<R: ReadBytesExt>(r: &mut R) -> Result<Msg> {
    Decodable::decode(r)
}

/// Helper function to write a 9P message into a byte-oriented stream
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg) -> Result<usize> {
    msg.encode(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn unhex(s: &str) -> Vec<u8> {
        assert_eq!(s.len() % 2, 0);
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    /// Build a full wire frame: size[4] (including itself) plus the body.
    fn frame(msg: &Msg) -> Vec<u8> {
        let mut body = Vec::new();
        write_msg(&mut body, msg).unwrap();
        let mut out = Vec::with_capacity(body.len() + 4);
        ((body.len() + 4) as u32).encode(&mut out).unwrap();
        out.extend_from_slice(&body);
        out
    }

    /// Parse a full wire frame, checking the size field covers the input.
    fn unframe(bytes: &[u8]) -> Msg {
        let mut cursor = Cursor::new(bytes);
        let size: u32 = Decodable::decode(&mut cursor).unwrap();
        assert_eq!(size as usize, bytes.len());
        read_msg(&mut cursor).unwrap()
    }

    #[test]
    fn decode_tauth_vector() {
        let input = unhex("19000000665500010000000500756E616D650500616E616D65");
        let msg = unframe(&input);
        assert_eq!(
            msg,
            Msg {
                tag: 0x55,
                body: FCall::TAuth {
                    afid: 0x01,
                    uname: "uname".to_owned(),
                    aname: "aname".to_owned(),
                },
            }
        );
    }

    #[test]
    fn encode_rversion_vector() {
        let msg = Msg {
            tag: 0x75,
            body: FCall::RVersion {
                msize: 0x15,
                version: "test".to_owned(),
            },
        };
        assert_eq!(frame(&msg), unhex("1100000065750015000000040074657374"));
    }

    #[test]
    fn decode_twstat_vector() {
        let input = unhex(
            "3A0000007E00000100000031002F00FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF\
             FFFFFFFFFFFFFFBA0E3263BA0E3263FFFFFFFFFFFFFFFF0000000000000000",
        );
        let msg = unframe(&input);
        match msg.body {
            FCall::TWStat { fid, ref stat } => {
                assert_eq!(msg.tag, 0);
                assert_eq!(fid, 1);
                assert_eq!(stat.stype, 0xFFFF);
                assert_eq!(stat.length, u64::MAX);
                assert_eq!(stat.atime, 0x63320EBA);
                assert_eq!(stat.name, "");
                assert_eq!(stat.muid, "");
            }
            ref other => panic!("wrong message type: {:?}", other),
        }
    }

    fn sample_stat() -> Stat {
        Stat {
            stype: 0,
            dev: 0,
            qid: QId {
                typ: QIdType::DIR,
                version: 7,
                path: 42,
            },
            mode: dm::DIR | 0o755,
            atime: 1_700_000_000,
            mtime: 1_700_000_001,
            length: 0,
            name: "docs".to_owned(),
            uid: "?".to_owned(),
            gid: "?".to_owned(),
            muid: String::new(),
        }
    }

    fn sample_r_messages() -> Vec<Msg> {
        let qid = QId {
            typ: QIdType::FILE,
            version: 1,
            path: 3,
        };
        [
            FCall::RVersion {
                msize: 8192,
                version: P92000.to_owned(),
            },
            FCall::RAuth { aqid: qid },
            FCall::RAttach { qid },
            FCall::RError {
                ename: "protocol botch".to_owned(),
            },
            FCall::RFlush,
            FCall::RWalk {
                wqids: vec![qid, sample_stat().qid],
            },
            FCall::ROpen { qid, iounit: 0 },
            FCall::RCreate { qid, iounit: 0 },
            FCall::RRead {
                data: Data(b"payload".to_vec()),
            },
            FCall::RWrite { count: 7 },
            FCall::RClunk,
            FCall::RRemove,
            FCall::RStat {
                stat: sample_stat(),
            },
            FCall::RWStat,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, body)| Msg {
            tag: i as u16,
            body,
        })
        .collect()
    }

    fn sample_t_messages() -> Vec<Msg> {
        [
            FCall::TVersion {
                msize: 8192,
                version: P92000.to_owned(),
            },
            FCall::TAuth {
                afid: NOFID,
                uname: "glenda".to_owned(),
                aname: String::new(),
            },
            FCall::TAttach {
                fid: 0,
                afid: NOFID,
                uname: "glenda".to_owned(),
                aname: String::new(),
            },
            FCall::TFlush { oldtag: 9 },
            FCall::TWalk {
                fid: 0,
                newfid: 1,
                wnames: vec!["a".to_owned(), "b.txt".to_owned()],
            },
            FCall::TOpen {
                fid: 1,
                mode: om::READ,
            },
            FCall::TCreate {
                fid: 1,
                name: "new".to_owned(),
                perm: dm::DIR | 0o750,
                mode: om::RDWR,
            },
            FCall::TRead {
                fid: 1,
                offset: 16,
                count: 100,
            },
            FCall::TWrite {
                fid: 1,
                offset: 0,
                data: Data(vec![0, 1, 2, 0xFF]),
            },
            FCall::TClunk { fid: 1 },
            FCall::TRemove { fid: 1 },
            FCall::TStat { fid: 1 },
            FCall::TWStat {
                fid: 1,
                stat: sample_stat(),
            },
        ]
        .into_iter()
        .enumerate()
        .map(|(i, body)| Msg {
            tag: i as u16,
            body,
        })
        .collect()
    }

    #[test]
    fn r_messages_roundtrip() {
        for expected in sample_r_messages() {
            let mut buf = Vec::new();
            write_msg(&mut buf, &expected).unwrap();
            let actual = read_msg(&mut Cursor::new(buf)).unwrap();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn t_frames_roundtrip_byte_exact() {
        for msg in sample_t_messages() {
            let bytes = frame(&msg);
            let decoded = unframe(&bytes);
            assert_eq!(msg, decoded);
            assert_eq!(bytes, frame(&decoded));
        }
    }

    #[test]
    fn truncated_input_is_an_error() {
        for msg in sample_t_messages() {
            let mut body = Vec::new();
            write_msg(&mut body, &msg).unwrap();
            for cut in 0..body.len() {
                assert!(
                    read_msg(&mut Cursor::new(&body[..cut])).is_err(),
                    "truncation at {} of {:?} did not fail",
                    cut,
                    msg
                );
            }
        }
    }

    #[test]
    fn overlong_string_length_is_an_error() {
        // TVersion whose version string claims more bytes than the frame holds
        let mut body = Vec::new();
        write_msg(
            &mut body,
            &Msg {
                tag: 1,
                body: FCall::TVersion {
                    msize: 8192,
                    version: "9P2000".to_owned(),
                },
            },
        )
        .unwrap();
        let strlen_at = body.len() - P92000.len() - 2;
        body[strlen_at] = 0xFF;
        assert!(read_msg(&mut Cursor::new(body)).is_err());
    }

    #[test]
    fn unknown_type_byte_is_an_error() {
        // 106 is the illegal Terror, 6 is from a different protocol family
        for typ in [6u8, 99, 106, 128, 255] {
            let body = vec![typ, 0, 0];
            assert!(read_msg(&mut Cursor::new(body)).is_err());
        }
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        // TVersion with version bytes that are not UTF-8
        let mut body = vec![100, 0, 0];
        (8192u32).encode(&mut body).unwrap();
        (2u16).encode(&mut body).unwrap();
        body.extend_from_slice(&[0xFF, 0xFE]);
        assert!(read_msg(&mut Cursor::new(body)).is_err());
    }

    #[test]
    fn stat_wrapping_is_double_in_rstat() {
        let stat = sample_stat();
        let mut body = Vec::new();
        write_msg(
            &mut body,
            &Msg {
                tag: 0,
                body: FCall::RStat { stat: stat.clone() },
            },
        )
        .unwrap();
        // type[1] tag[2] outer[2] inner[2] body[size]
        let outer = u16::from_le_bytes([body[3], body[4]]);
        let inner = u16::from_le_bytes([body[5], body[6]]);
        assert_eq!(outer, stat.size() + 2);
        assert_eq!(inner, stat.size());
        assert_eq!(body.len(), 3 + 2 + 2 + stat.size() as usize);
    }
}
