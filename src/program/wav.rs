use crate::cd::SECTOR_SIZE;
use crate::program::error::{AudioError, AudioResult};
use binrw::{BinRead, BinWrite};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

const CD_CHANNELS: u16 = 2;
const CD_SAMPLE_RATE: u32 = 44100;
const CD_BITS_PER_SAMPLE: u16 = 16;
const WAVE_FORMAT_PCM: u16 = 1;

/// Length of the header cd-paranoia writes.
pub const WAV_HEADER_LENGTH: u64 = 44;

#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(little, magic = b"RIFF")]
struct RiffHeader {
    size: u32,
    #[br(assert(format == *b"WAVE"))]
    format: [u8; 4],
}

#[derive(BinRead, BinWrite, Debug, Clone)]
#[brw(little)]
struct ChunkHeader {
    id: [u8; 4],
    size: u32,
}

#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct FmtChunk {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl FmtChunk {
    pub fn cd_audio() -> Self {
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels: CD_CHANNELS,
            sample_rate: CD_SAMPLE_RATE,
            byte_rate: CD_SAMPLE_RATE * 4,
            block_align: 4,
            bits_per_sample: CD_BITS_PER_SAMPLE,
        }
    }

    pub fn is_cd_audio(&self) -> bool {
        self.format_tag == WAVE_FORMAT_PCM
            && self.channels == CD_CHANNELS
            && self.sample_rate == CD_SAMPLE_RATE
            && self.bits_per_sample == CD_BITS_PER_SAMPLE
    }
}

/// Layout of a RIFF/WAVE file: its format and where the PCM data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavInfo {
    pub format: FmtChunk,
    pub data_offset: u64,
    pub data_length: u64,
}

impl WavInfo {
    pub fn read<R: Read + Seek>(reader: &mut R) -> AudioResult<Self> {
        RiffHeader::read(reader)?;

        let mut format = None;
        loop {
            let chunk = match ChunkHeader::read(reader) {
                Ok(chunk) => chunk,
                Err(e) if e.is_eof() => return Err(AudioError::MissingData),
                Err(e) => return Err(e.into()),
            };

            match &chunk.id {
                b"fmt " => {
                    let start = reader.stream_position()?;
                    format = Some(FmtChunk::read(reader)?);
                    reader.seek(SeekFrom::Start(start + padded(chunk.size)))?;
                }
                b"data" => {
                    let format = format.ok_or(AudioError::MissingFormat)?;
                    let data_offset = reader.stream_position()?;
                    return Ok(Self {
                        format,
                        data_offset,
                        data_length: chunk.size as u64,
                    });
                }
                _ => {
                    reader.seek(SeekFrom::Current(padded(chunk.size) as i64))?;
                }
            }
        }
    }

    pub fn require_cd_audio(&self) -> AudioResult<()> {
        if self.format.is_cd_audio() {
            Ok(())
        } else {
            Err(AudioError::NotCdAudio(self.format.clone()))
        }
    }

    /// Whole CD frames of audio.
    pub fn frames(&self) -> u64 {
        self.data_length / SECTOR_SIZE as u64
    }

    /// Stereo samples (32-bit words) of audio.
    pub fn samples(&self) -> u64 {
        self.data_length / 4
    }
}

/// Streams the data chunk of a CD audio WAV file. `start` receives the
/// number of stereo samples before any data arrives.
pub fn read_pcm<T>(
    path: &Path,
    start: impl FnOnce(u64) -> T,
    mut update: impl FnMut(&mut T, &[u8]),
) -> AudioResult<T> {
    let mut reader = BufReader::new(File::open(path)?);
    let info = WavInfo::read(&mut reader)?;
    info.require_cd_audio()?;

    reader.seek(SeekFrom::Start(info.data_offset))?;
    let mut data = reader.take(info.data_length);
    let mut state = start(info.samples());

    let mut buf = vec![0u8; super::READ_CHUNK];
    loop {
        let n = data.read(&mut buf)?;
        if n == 0 {
            break;
        }
        update(&mut state, &buf[..n]);
    }

    Ok(state)
}

/// Stereo samples in the data chunk of a CD audio WAV file.
pub fn sample_count(path: &Path) -> AudioResult<u64> {
    let info = WavInfo::read(&mut BufReader::new(File::open(path)?))?;
    info.require_cd_audio()?;
    Ok(info.samples())
}

fn padded(size: u32) -> u64 {
    size as u64 + (size as u64 & 1)
}

/// Writes the 44-byte header of a CD audio WAV holding `data_length` bytes.
pub fn write_cd_header<W: Write + Seek>(writer: &mut W, data_length: u32) -> AudioResult<()> {
    RiffHeader {
        size: 36 + data_length,
        format: *b"WAVE",
    }
    .write(writer)?;
    ChunkHeader {
        id: *b"fmt ",
        size: 16,
    }
    .write(writer)?;
    FmtChunk::cd_audio().write(writer)?;
    ChunkHeader {
        id: *b"data",
        size: data_length,
    }
    .write(writer)?;
    Ok(())
}
