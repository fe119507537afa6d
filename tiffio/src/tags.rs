//! Tag numbers, field types and the directory fields this crate knows about

/// Directory tags understood by the client codec
pub mod tag {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const THRESHHOLDING: u16 = 263;
    pub const DOCUMENT_NAME: u16 = 269;
    pub const IMAGE_DESCRIPTION: u16 = 270;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const ORIENTATION: u16 = 274;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const X_RESOLUTION: u16 = 282;
    pub const Y_RESOLUTION: u16 = 283;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const X_POSITION: u16 = 286;
    pub const Y_POSITION: u16 = 287;
    pub const RESOLUTION_UNIT: u16 = 296;
    pub const SOFTWARE: u16 = 305;
    pub const DATE_TIME: u16 = 306;
    pub const ARTIST: u16 = 315;
    pub const COLOR_MAP: u16 = 320;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const EXTRA_SAMPLES: u16 = 338;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const IMAGE_DEPTH: u16 = 32997;
    pub const COPYRIGHT: u16 = 33432;
}

/// Field types as stored in a directory entry
pub mod data_type {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const SBYTE: u16 = 6;
    pub const UNDEFINED: u16 = 7;
    pub const SSHORT: u16 = 8;
    pub const SLONG: u16 = 9;
    pub const SRATIONAL: u16 = 10;
    pub const FLOAT: u16 = 11;
    pub const DOUBLE: u16 = 12;

    /// Byte size of one value of the given type, 0 when unknown
    pub fn size(type_id: u16) -> usize {
        match type_id {
            BYTE | ASCII | SBYTE | UNDEFINED => 1,
            SHORT | SSHORT => 2,
            LONG | SLONG | FLOAT => 4,
            RATIONAL | SRATIONAL | DOUBLE => 8,
            _ => 0,
        }
    }
}

/// Fields the host glue reads from every directory.
pub const SUPPORTED_TAGS: [u16; 26] = [
    tag::IMAGE_WIDTH,
    tag::IMAGE_LENGTH,
    tag::IMAGE_DEPTH,
    tag::BITS_PER_SAMPLE,
    tag::SAMPLES_PER_PIXEL,
    tag::SAMPLE_FORMAT,
    tag::PLANAR_CONFIG,
    tag::ROWS_PER_STRIP,
    tag::TILE_WIDTH,
    tag::TILE_LENGTH,
    tag::COMPRESSION,
    tag::THRESHHOLDING,
    tag::X_RESOLUTION,
    tag::Y_RESOLUTION,
    tag::X_POSITION,
    tag::Y_POSITION,
    tag::RESOLUTION_UNIT,
    tag::ORIENTATION,
    tag::COPYRIGHT,
    tag::ARTIST,
    tag::DOCUMENT_NAME,
    tag::DATE_TIME,
    tag::IMAGE_DESCRIPTION,
    tag::SOFTWARE,
    tag::PHOTOMETRIC,
    tag::COLOR_MAP,
];

/// Human readable field name, `None` for tags the codec does not know
pub fn tag_name(tag_id: u16) -> Option<&'static str> {
    let name = match tag_id {
        tag::IMAGE_WIDTH => "ImageWidth",
        tag::IMAGE_LENGTH => "ImageLength",
        tag::BITS_PER_SAMPLE => "BitsPerSample",
        tag::COMPRESSION => "Compression",
        tag::PHOTOMETRIC => "PhotometricInterpretation",
        tag::THRESHHOLDING => "Threshholding",
        tag::DOCUMENT_NAME => "DocumentName",
        tag::IMAGE_DESCRIPTION => "ImageDescription",
        tag::STRIP_OFFSETS => "StripOffsets",
        tag::ORIENTATION => "Orientation",
        tag::SAMPLES_PER_PIXEL => "SamplesPerPixel",
        tag::ROWS_PER_STRIP => "RowsPerStrip",
        tag::STRIP_BYTE_COUNTS => "StripByteCounts",
        tag::X_RESOLUTION => "XResolution",
        tag::Y_RESOLUTION => "YResolution",
        tag::PLANAR_CONFIG => "PlanarConfiguration",
        tag::X_POSITION => "XPosition",
        tag::Y_POSITION => "YPosition",
        tag::RESOLUTION_UNIT => "ResolutionUnit",
        tag::SOFTWARE => "Software",
        tag::DATE_TIME => "DateTime",
        tag::ARTIST => "Artist",
        tag::COLOR_MAP => "ColorMap",
        tag::TILE_WIDTH => "TileWidth",
        tag::TILE_LENGTH => "TileLength",
        tag::TILE_OFFSETS => "TileOffsets",
        tag::TILE_BYTE_COUNTS => "TileByteCounts",
        tag::EXTRA_SAMPLES => "ExtraSamples",
        tag::SAMPLE_FORMAT => "SampleFormat",
        tag::IMAGE_DEPTH => "ImageDepth",
        tag::COPYRIGHT => "Copyright",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_size() {
        assert_eq!(data_type::size(data_type::BYTE), 1);
        assert_eq!(data_type::size(data_type::SHORT), 2);
        assert_eq!(data_type::size(data_type::LONG), 4);
        assert_eq!(data_type::size(data_type::RATIONAL), 8);
        assert_eq!(data_type::size(99), 0);
    }

    #[test]
    fn test_supported_tags_are_named() {
        for &t in SUPPORTED_TAGS.iter() {
            assert!(tag_name(t).is_some(), "tag {} has no name", t);
        }
        assert_eq!(tag_name(65000), None);
    }
}
