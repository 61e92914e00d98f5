//! Unified metadata.
//!
//! One API over the three places movie metadata lives in: the classic
//! user data atom, the iTunes item list, and QuickTime `mdta` keyed
//! metadata. An item is addressed by a (storage format, key format,
//! key bytes) triple and referred to by an opaque handle that stays
//! valid until that item itself is removed.
//!
use std::convert::TryInto;
use std::io;

use once_cell::sync::Lazy;

use crate::types::{FourCC, MacLanguage};
use crate::udta::UserData;

/// Where an item is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageFormat {
    /// Classic user data ('udta').
    UserData,
    /// iTunes item list ('itms').
    Itunes,
    /// QuickTime keyed metadata ('mdta').
    QuickTime,
}

impl StorageFormat {
    pub fn fourcc(&self) -> FourCC {
        match self {
            StorageFormat::UserData => FourCC::new(b"udta"),
            StorageFormat::Itunes => FourCC::new(b"itms"),
            StorageFormat::QuickTime => FourCC::new(b"mdta"),
        }
    }
}

/// How an item's key bytes are to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFormat {
    /// A well-known key: 32 bit big-endian `CommonKey` code.
    Common,
    /// Classic user data FourCC tag.
    UserData,
    /// iTunes FourCC ('©nam' and friends).
    ItunesShort,
    /// iTunes long (reverse-DNS qualified) name.
    ItunesLong,
    /// Reverse-DNS string ("com.example.key").
    ReverseDns,
}

impl KeyFormat {
    pub fn fourcc(&self) -> FourCC {
        match self {
            KeyFormat::Common => FourCC::new(b"comn"),
            KeyFormat::UserData => FourCC::new(b"udta"),
            KeyFormat::ItunesShort => FourCC::new(b"itsk"),
            KeyFormat::ItunesLong => FourCC::new(b"itlk"),
            KeyFormat::ReverseDns => FourCC::new(b"mdta"),
        }
    }
}

/// The well-known keys, with their legacy user-data and iTunes
/// equivalents where those exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommonKey {
    Author,
    Comment,
    Copyright,
    Director,
    DisplayName,
    Information,
    Keywords,
    Producer,
    Software,
    Album,
    Artist,
    Artwork,
    Composer,
    Description,
    Genre,
    OriginalFormat,
    OriginalSource,
    Performers,
}

struct CommonKeyEntry {
    key:    CommonKey,
    code:   u32,
    udta:   Option<FourCC>,
    itunes: Option<FourCC>,
}

static COMMON_KEYS: Lazy<Vec<CommonKeyEntry>> = Lazy::new(|| {
    use CommonKey::*;
    let e = |key, code, udta: Option<&[u8; 4]>, itunes: Option<&[u8; 4]>| CommonKeyEntry {
        key,
        code,
        udta: udta.map(FourCC::new),
        itunes: itunes.map(FourCC::new),
    };
    vec![
        e(Author, 1, Some(b"\xa9aut"), Some(b"\xa9aut")),
        e(Comment, 2, Some(b"\xa9cmt"), Some(b"\xa9cmt")),
        e(Copyright, 3, Some(b"\xa9cpy"), Some(b"cprt")),
        e(Director, 4, Some(b"\xa9dir"), None),
        e(DisplayName, 5, Some(b"\xa9nam"), Some(b"\xa9nam")),
        e(Information, 6, Some(b"\xa9inf"), None),
        e(Keywords, 7, Some(b"\xa9key"), None),
        e(Producer, 8, Some(b"\xa9prd"), None),
        e(Software, 9, Some(b"\xa9swr"), Some(b"\xa9too")),
        e(Album, 10, Some(b"\xa9alb"), Some(b"\xa9alb")),
        e(Artist, 11, Some(b"\xa9ART"), Some(b"\xa9ART")),
        e(Artwork, 12, None, Some(b"covr")),
        e(Composer, 13, Some(b"\xa9wrt"), Some(b"\xa9wrt")),
        e(Description, 14, Some(b"\xa9des"), Some(b"desc")),
        e(Genre, 15, Some(b"\xa9gen"), Some(b"\xa9gen")),
        e(OriginalFormat, 16, Some(b"\xa9fmt"), None),
        e(OriginalSource, 17, Some(b"\xa9src"), None),
        e(Performers, 18, Some(b"\xa9prf"), None),
    ]
});

impl CommonKey {
    /// Numeric key code, used as the key bytes in `Common` format.
    pub fn code(&self) -> u32 {
        COMMON_KEYS.iter().find(|e| e.key == *self).map(|e| e.code).unwrap()
    }

    pub fn from_code(code: u32) -> Option<CommonKey> {
        COMMON_KEYS.iter().find(|e| e.code == code).map(|e| e.key)
    }

    /// The key bytes for this key in `Common` format.
    pub fn key_bytes(&self) -> Vec<u8> {
        self.code().to_be_bytes().to_vec()
    }

    /// The legacy classic user data tag, if there is one.
    pub fn udta_tag(&self) -> Option<FourCC> {
        COMMON_KEYS.iter().find(|e| e.key == *self).and_then(|e| e.udta)
    }

    pub fn from_udta_tag(tag: FourCC) -> Option<CommonKey> {
        COMMON_KEYS.iter().find(|e| e.udta == Some(tag)).map(|e| e.key)
    }

    /// The iTunes item list tag, if there is one.
    pub fn itunes_tag(&self) -> Option<FourCC> {
        COMMON_KEYS.iter().find(|e| e.key == *self).and_then(|e| e.itunes)
    }

    pub fn from_itunes_tag(tag: FourCC) -> Option<CommonKey> {
        COMMON_KEYS.iter().find(|e| e.itunes == Some(tag)).map(|e| e.key)
    }
}

/// One metadata item.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaItem {
    handle:         u64,
    pub storage:    StorageFormat,
    pub key_format: KeyFormat,
    pub key:        Vec<u8>,
    pub value:      Vec<u8>,
    /// Value type code; 1 is UTF-8 text.
    pub data_type:  u32,
}

impl MetaItem {
    pub const DATA_TYPE_BINARY: u32 = 0;
    pub const DATA_TYPE_UTF8: u32 = 1;

    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// The key as a FourCC, for the FourCC-keyed formats.
    pub fn key_fourcc(&self) -> Option<FourCC> {
        match self.key_format {
            KeyFormat::UserData | KeyFormat::ItunesShort => {
                let b: [u8; 4] = self.key[..].try_into().ok()?;
                Some(FourCC::new(&b))
            },
            _ => None,
        }
    }

    /// The common key, if the key format is `Common`.
    pub fn common_key(&self) -> Option<CommonKey> {
        if self.key_format != KeyFormat::Common {
            return None;
        }
        let b: [u8; 4] = self.key[..].try_into().ok()?;
        CommonKey::from_code(u32::from_be_bytes(b))
    }

    pub fn value_str(&self) -> Option<&str> {
        if self.data_type != MetaItem::DATA_TYPE_UTF8 {
            return None;
        }
        std::str::from_utf8(&self.value).ok()
    }
}

/// Metadata store of a movie or track.
///
/// Handles are never reused; an item keeps its handle until it is
/// removed, regardless of what happens to other items.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataStore {
    items:       Vec<MetaItem>,
    next_handle: u64,
}

impl MetadataStore {
    pub fn new() -> MetadataStore {
        MetadataStore::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an item, returning its handle.
    pub fn add_item(
        &mut self,
        storage: StorageFormat,
        key_format: KeyFormat,
        key: Vec<u8>,
        value: Vec<u8>,
        data_type: u32,
    ) -> u64 {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.items.push(MetaItem {
            handle,
            storage,
            key_format,
            key,
            value,
            data_type,
        });
        handle
    }

    /// Add a UTF-8 text item under a common key.
    pub fn add_common_item(&mut self, storage: StorageFormat, key: CommonKey, value: &str) -> u64 {
        self.add_item(
            storage,
            KeyFormat::Common,
            key.key_bytes(),
            value.as_bytes().to_vec(),
            MetaItem::DATA_TYPE_UTF8,
        )
    }

    pub fn get_item(&self, handle: u64) -> Option<&MetaItem> {
        self.items.iter().find(|i| i.handle == handle)
    }

    pub fn set_value(&mut self, handle: u64, value: Vec<u8>, data_type: u32) -> io::Result<()> {
        match self.items.iter_mut().find(|i| i.handle == handle) {
            Some(item) => {
                item.value = value;
                item.data_type = data_type;
                Ok(())
            },
            None => Err(ioerr!(NotFound, "no metadata item with handle {}", handle)),
        }
    }

    pub fn remove_item(&mut self, handle: u64) -> bool {
        let len = self.items.len();
        self.items.retain(|i| i.handle != handle);
        self.items.len() != len
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaItem> {
        self.items.iter()
    }

    /// Cursor iteration over items matching a pattern. `None` pattern
    /// fields are wildcards; `prev` of `None` starts at the front,
    /// otherwise iteration continues after that handle (which does not
    /// have to refer to a live item anymore).
    pub fn next_item(
        &self,
        storage: Option<StorageFormat>,
        key_format: Option<KeyFormat>,
        key: Option<&[u8]>,
        prev: Option<u64>,
    ) -> Option<u64> {
        let after = prev.unwrap_or(0);
        self.items
            .iter()
            .filter(|i| i.handle > after)
            .filter(|i| storage.map_or(true, |s| i.storage == s))
            .filter(|i| key_format.map_or(true, |k| i.key_format == k))
            .filter(|i| key.map_or(true, |k| i.key == k))
            .map(|i| i.handle)
            .next()
    }

    /// First matching item's text value.
    pub fn find_text(&self, key: CommonKey) -> Option<&str> {
        let handle = self.next_item(None, Some(KeyFormat::Common), Some(&key.key_bytes()), None)?;
        self.get_item(handle)?.value_str()
    }

    /// Import the well-known text tags from a classic user data store.
    pub fn import_user_data(&mut self, udta: &UserData) {
        for tag in udta.text_tags() {
            let key = match CommonKey::from_udta_tag(tag) {
                Some(key) => key,
                None => continue,
            };
            for language in udta.text_languages(tag) {
                if let Some(text) = udta.get_text(tag, language) {
                    self.add_item(
                        StorageFormat::UserData,
                        KeyFormat::Common,
                        key.key_bytes(),
                        text.to_vec(),
                        MetaItem::DATA_TYPE_UTF8,
                    );
                }
            }
        }
    }

    /// Export the common-key items that have a legacy tag back into a
    /// classic user data store.
    pub fn export_user_data(&self, udta: &mut UserData) {
        for item in &self.items {
            if item.storage != StorageFormat::UserData {
                continue;
            }
            let tag = match item.common_key().and_then(|k| k.udta_tag()) {
                Some(tag) => tag,
                None => continue,
            };
            udta.add_text(tag, MacLanguage::default(), item.value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_key_table_is_one_to_one() {
        for e in COMMON_KEYS.iter() {
            assert_eq!(CommonKey::from_code(e.code), Some(e.key));
            if let Some(tag) = e.udta {
                assert_eq!(CommonKey::from_udta_tag(tag), Some(e.key));
            }
        }
        assert_eq!(CommonKey::Copyright.udta_tag(), Some(FourCC::new(b"\xa9cpy")));
        assert_eq!(CommonKey::Artist.udta_tag(), Some(FourCC::new(b"\xa9ART")));
        assert_eq!(CommonKey::Artwork.udta_tag(), None);
        assert_eq!(CommonKey::Artwork.itunes_tag(), Some(FourCC::new(b"covr")));
    }

    #[test]
    fn handles_are_not_reused() {
        let mut store = MetadataStore::new();
        let a = store.add_common_item(StorageFormat::Itunes, CommonKey::Album, "one");
        let b = store.add_common_item(StorageFormat::Itunes, CommonKey::Artist, "two");
        assert!(store.remove_item(a));
        let c = store.add_common_item(StorageFormat::Itunes, CommonKey::Genre, "three");
        assert!(c > b);
        assert!(store.get_item(a).is_none());
        assert_eq!(store.get_item(b).unwrap().value_str(), Some("two"));
    }

    #[test]
    fn wildcard_cursor() {
        let mut store = MetadataStore::new();
        let a = store.add_common_item(StorageFormat::UserData, CommonKey::Author, "a");
        let b = store.add_common_item(StorageFormat::Itunes, CommonKey::Album, "b");
        let c = store.add_common_item(StorageFormat::QuickTime, CommonKey::Author, "c");

        // Full wildcard walks everything in order.
        assert_eq!(store.next_item(None, None, None, None), Some(a));
        assert_eq!(store.next_item(None, None, None, Some(a)), Some(b));
        assert_eq!(store.next_item(None, None, None, Some(b)), Some(c));
        assert_eq!(store.next_item(None, None, None, Some(c)), None);

        // Filter by storage.
        assert_eq!(store.next_item(Some(StorageFormat::Itunes), None, None, None), Some(b));

        // Filter by key across storages.
        let key = CommonKey::Author.key_bytes();
        assert_eq!(store.next_item(None, None, Some(&key), None), Some(a));
        assert_eq!(store.next_item(None, None, Some(&key), Some(a)), Some(c));
    }

    #[test]
    fn cursor_survives_removal_of_prev() {
        let mut store = MetadataStore::new();
        let a = store.add_common_item(StorageFormat::Itunes, CommonKey::Album, "a");
        let b = store.add_common_item(StorageFormat::Itunes, CommonKey::Artist, "b");
        store.remove_item(a);
        assert_eq!(store.next_item(None, None, None, Some(a)), Some(b));
    }

    #[test]
    fn user_data_import_export() {
        let eng = MacLanguage::from_iso639("eng").unwrap();
        let mut udta = UserData::new();
        udta.add_text(FourCC::new(b"\xa9cpy"), eng, b"(c) me".to_vec());
        udta.add_text(FourCC::new(b"\xa9nam"), eng, b"My Movie".to_vec());
        // Not a well-known tag, ignored by the import.
        udta.add_text(FourCC::new(b"\xa9xyz"), eng, b"huh".to_vec());

        let mut store = MetadataStore::new();
        store.import_user_data(&udta);
        assert_eq!(store.len(), 2);
        assert_eq!(store.find_text(CommonKey::Copyright), Some("(c) me"));
        assert_eq!(store.find_text(CommonKey::DisplayName), Some("My Movie"));

        let mut udta2 = UserData::new();
        store.export_user_data(&mut udta2);
        assert_eq!(
            udta2.get_text(FourCC::new(b"\xa9cpy"), MacLanguage::default()),
            Some(&b"(c) me"[..])
        );
    }
}
