//! Box type database: FourCC tags and their enum mapping.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:expr),* , ) => {
        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> Self {
                use self::BoxType::*;
                match t {
                    $($boxtype => $boxenum),*,
                    _ => UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                use self::BoxType::*;
                match b {
                    $($boxenum => $boxtype),*,
                    UnknownBox(t) => t,
                }
            }
        }
    }
}

box_database!(
    FileTypeBox 0x6674_7970,                   // "ftyp"
    TrackTypeBox 0x7474_7970,                  // "ttyp"
    MetadataBox 0x6d65_7461,                   // "meta"
    HandlerBox 0x6864_6c72,                    // "hdlr"
    PrimaryItemBox 0x7069_746d,                // "pitm"
    DataInformationBox 0x6469_6e66,            // "dinf"
    DataReferenceBox 0x6472_6566,              // "dref"
    DataEntryUrlBox 0x7572_6c20,               // "url "
    DataEntryUrnBox 0x7572_6e20,               // "urn "
    ItemLocationBox 0x696c_6f63,               // "iloc"
    ItemProtectionBox 0x6970_726f,             // "ipro"
    ProtectionSchemeInfoBox 0x7369_6e66,       // "sinf"
    ItemInfoBox 0x6969_6e66,                   // "iinf"
    ItemInfoEntry 0x696e_6665,                 // "infe"
    ItemReferenceBox 0x6972_6566,              // "iref"
    ItemDataBox 0x6964_6174,                   // "idat"
    ItemPropertiesBox 0x6970_7270,             // "iprp"
    ItemPropertyContainerBox 0x6970_636f,      // "ipco"
    ItemPropertyAssociationBox 0x6970_6d61,    // "ipma"
    GroupsListBox 0x6772_706c,                 // "grpl"
    SampleGroupDescriptionBox 0x7367_7064,     // "sgpd"
    SegmentIndexBox 0x7369_6478,               // "sidx"
    CompositionToDecodeBox 0x6373_6c67,        // "cslg"
    MediaDataBox 0x6d64_6174,                  // "mdat"
    FreeSpaceBox 0x6672_6565,                  // "free"
    SkipBox 0x736b_6970,                       // "skip"
    UuidBox 0x7575_6964,                       // "uuid"
    AccessibilityTextProperty 0x616c_7474,     // "altt"
    AuxiliaryTypeProperty 0x6175_7843,         // "auxC"
    AVCConfigurationBox 0x6176_6343,           // "avcC"
    CleanApertureBox 0x636c_6170,              // "clap"
    ColourInformationBox 0x636f_6c72,          // "colr"
    CreationTimeProperty 0x6372_7474,          // "crtt"
    HEVCConfigurationBox 0x6876_6343,          // "hvcC"
    ImageMirrorProperty 0x696d_6972,           // "imir"
    ImageRotationProperty 0x6972_6f74,         // "irot"
    ImageScalingProperty 0x6973_636c,          // "iscl"
    ImageSpatialExtentsProperty 0x6973_7065,   // "ispe"
    JpegConfigurationBox 0x6a70_6743,          // "jpgC"
    ModificationTimeProperty 0x6d64_6674,      // "mdft"
    PixelAspectRatioBox 0x7061_7370,           // "pasp"
    PixelInformationProperty 0x7069_7869,      // "pixi"
    RelativeLocationProperty 0x726c_6f63,      // "rloc"
    RequiredReferenceTypesProperty 0x7272_6566, // "rref"
    UserDescriptionBox 0x7564_6573,            // "udes"
);

/// Four-byte tag packed big-endian, used for box types, brands,
/// reference types and grouping types.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FourCC {
    pub value: [u8; 4],
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self { value: number.to_be_bytes() }
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self { value }
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        Self::from(u32::from(t))
    }
}

impl From<FourCC> for u32 {
    fn from(cc: FourCC) -> Self {
        u32::from_be_bytes(cc.value)
    }
}

impl From<FourCC> for BoxType {
    fn from(cc: FourCC) -> Self {
        Self::from(u32::from(cc))
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.value == **other
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.value) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(f, "{:x?}", self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_round_trip() {
        assert_eq!(BoxType::from(0x696c_6f63), BoxType::ItemLocationBox);
        assert_eq!(u32::from(BoxType::ItemLocationBox), 0x696c_6f63);
        assert_eq!(FourCC::from(BoxType::ItemLocationBox), b"iloc");
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let t = BoxType::from(0x7465_7374); // "test"
        assert_eq!(t, BoxType::UnknownBox(0x7465_7374));
        assert_eq!(u32::from(t), 0x7465_7374);
    }

    #[test]
    fn skip_and_free_are_distinct_tags() {
        // Both map to the free-space payload, but keep their own tag on the wire.
        assert_eq!(FourCC::from(BoxType::FreeSpaceBox), b"free");
        assert_eq!(FourCC::from(BoxType::SkipBox), b"skip");
    }

    #[test]
    fn fourcc_display() {
        assert_eq!(FourCC::from(*b"auxC").to_string(), "auxC");
        assert_eq!(u32::from(FourCC::from(*b"ftyp")), 0x6674_7970);
    }
}
