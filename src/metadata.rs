//! EXIF metadata of uploaded originals.

use std::io::{BufRead, ErrorKind, Seek};

use chrono::{NaiveDate, NaiveDateTime};
use exif::{Exif, In, Reader, Tag, Value};

use crate::error::Result;

/// Where a picture was taken.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoLocation {
    /// Degrees, negative south of the equator.
    pub latitude: f64,
    /// Degrees, negative west of Greenwich.
    pub longitude: f64,
    /// Metres, negative below sea level.
    pub altitude: Option<f64>,
}

/// Metadata embedded in an original.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MediaMetadata {
    /// Capture time in the camera's local clock.
    pub created: Option<NaiveDateTime>,
    pub camera_model: Option<String>,
    pub location: Option<GeoLocation>,
}

impl MediaMetadata {
    /// True when no field could be read.
    pub fn is_empty(&self) -> bool {
        self.created.is_none() && self.camera_model.is_none() && self.location.is_none()
    }
}

/// Reads EXIF from a JPEG, PNG, HEIF or TIFF container.
///
/// Returns `Ok(None)` when the file carries no usable EXIF block.
pub fn read_metadata<R: BufRead + Seek>(reader: &mut R) -> Result<Option<MediaMetadata>> {
    let exif = match Reader::new().read_from_container(reader) {
        Ok(exif) => exif,
        Err(exif::Error::Io(error)) if error.kind() != ErrorKind::UnexpectedEof => {
            return Err(error.into());
        }
        Err(error) => {
            tracing::debug!(%error, "no exif metadata");
            return Ok(None);
        }
    };
    let metadata = MediaMetadata {
        created: timestamp(&exif),
        camera_model: text(&exif, Tag::Model).or_else(|| text(&exif, Tag::LensModel)),
        location: location(&exif),
    };
    Ok((!metadata.is_empty()).then_some(metadata))
}

fn text(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(parts) = &field.value else {
        return None;
    };
    let joined = parts
        .iter()
        .map(|part| String::from_utf8_lossy(part).trim_matches(['\0', ' ']).to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

fn timestamp(exif: &Exif) -> Option<NaiveDateTime> {
    [Tag::DateTimeOriginal, Tag::DateTime]
        .into_iter()
        .find_map(|tag| {
            let field = exif.get_field(tag, In::PRIMARY)?;
            let Value::Ascii(parts) = &field.value else {
                return None;
            };
            let parsed = exif::DateTime::from_ascii(parts.first()?).ok()?;
            NaiveDate::from_ymd_opt(
                i32::from(parsed.year),
                u32::from(parsed.month),
                u32::from(parsed.day),
            )?
            .and_hms_opt(
                u32::from(parsed.hour),
                u32::from(parsed.minute),
                u32::from(parsed.second),
            )
        })
}

/// Degrees, minutes and seconds folded into signed degrees.
fn coordinate(exif: &Exif, value: Tag, reference: Tag, negative: &str) -> Option<f64> {
    let field = exif.get_field(value, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let mut degrees = 0.0;
    for (part, scale) in parts.iter().zip([1.0, 60.0, 3600.0]) {
        if part.denom == 0 {
            return None;
        }
        degrees += part.to_f64() / scale;
    }
    if text(exif, reference).is_some_and(|r| r.eq_ignore_ascii_case(negative)) {
        degrees = -degrees;
    }
    Some(degrees)
}

fn location(exif: &Exif) -> Option<GeoLocation> {
    let latitude = coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?;
    let longitude = coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?;
    let altitude = exif
        .get_field(Tag::GPSAltitude, In::PRIMARY)
        .and_then(|field| match &field.value {
            Value::Rational(parts) => parts.first().filter(|r| r.denom != 0).map(|r| r.to_f64()),
            _ => None,
        })
        .map(|metres| {
            let below_sea = exif
                .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
                == Some(1);
            if below_sea { -metres } else { metres }
        });
    Some(GeoLocation {
        latitude,
        longitude,
        altitude,
    })
}

/// JPEG fixture with camera model, capture time and a GPS fix.
#[cfg(test)]
pub(crate) fn exif_jpeg() -> Vec<u8> {
    fn entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: [u8; 4]) {
        out.extend(tag.to_le_bytes());
        out.extend(kind.to_le_bytes());
        out.extend(count.to_le_bytes());
        out.extend(value);
    }
    const ASCII: u16 = 2;
    const BYTE: u16 = 1;
    const LONG: u16 = 4;
    const RATIONAL: u16 = 5;

    // Little-endian TIFF: IFD0 at 8, Exif IFD at 58, GPS IFD at 96.
    let mut tiff = b"II\x2a\x00\x08\x00\x00\x00".to_vec();
    tiff.extend(3u16.to_le_bytes());
    entry(&mut tiff, 0x0110, ASCII, 8, 50u32.to_le_bytes());
    entry(&mut tiff, 0x8769, LONG, 1, 58u32.to_le_bytes());
    entry(&mut tiff, 0x8825, LONG, 1, 96u32.to_le_bytes());
    tiff.extend(0u32.to_le_bytes());
    tiff.extend(b"Pixel 7\0");
    assert_eq!(tiff.len(), 58);

    tiff.extend(1u16.to_le_bytes());
    entry(&mut tiff, 0x9003, ASCII, 20, 76u32.to_le_bytes());
    tiff.extend(0u32.to_le_bytes());
    tiff.extend(b"2023:07:14 18:30:05\0");
    assert_eq!(tiff.len(), 96);

    tiff.extend(6u16.to_le_bytes());
    entry(&mut tiff, 0x0001, ASCII, 2, *b"N\0\0\0");
    entry(&mut tiff, 0x0002, RATIONAL, 3, 174u32.to_le_bytes());
    entry(&mut tiff, 0x0003, ASCII, 2, *b"W\0\0\0");
    entry(&mut tiff, 0x0004, RATIONAL, 3, 198u32.to_le_bytes());
    entry(&mut tiff, 0x0005, BYTE, 1, [0; 4]);
    entry(&mut tiff, 0x0006, RATIONAL, 1, 222u32.to_le_bytes());
    tiff.extend(0u32.to_le_bytes());
    assert_eq!(tiff.len(), 174);
    for (num, denom) in [(48u32, 1u32), (51, 1), (30, 1), (2, 1), (17, 1), (40, 1), (35, 1)] {
        tiff.extend(num.to_le_bytes());
        tiff.extend(denom.to_le_bytes());
    }

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend(((2 + 6 + tiff.len()) as u16).to_be_bytes());
    jpeg.extend(b"Exif\0\0");
    jpeg.extend(tiff);
    jpeg.extend([0xFF, 0xD9]);
    jpeg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_camera_time_and_position() {
        let metadata = read_metadata(&mut Cursor::new(exif_jpeg()))
            .unwrap()
            .unwrap();

        assert_eq!(metadata.camera_model.as_deref(), Some("Pixel 7"));
        assert_eq!(
            metadata.created,
            NaiveDate::from_ymd_opt(2023, 7, 14).and_then(|d| d.and_hms_opt(18, 30, 5))
        );
        let location = metadata.location.unwrap();
        assert!((location.latitude - 48.858_333).abs() < 1e-5);
        assert!((location.longitude + 2.294_444).abs() < 1e-5);
        assert_eq!(location.altitude, Some(35.0));
    }

    #[test]
    fn plain_jpeg_has_no_metadata() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, 0xFF, 0xD9];
        assert_eq!(read_metadata(&mut Cursor::new(jpeg)).unwrap(), None);
        let truncated = [0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        assert_eq!(read_metadata(&mut Cursor::new(truncated)).unwrap(), None);
    }

    #[test]
    fn video_has_no_metadata() {
        let mp4 = b"\0\0\0\x18ftypisom\0\0\0\0isommp42";
        assert_eq!(read_metadata(&mut Cursor::new(&mp4[..])).unwrap(), None);
    }
}
