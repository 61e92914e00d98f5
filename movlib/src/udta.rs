//! Classic user data.
//!
//! A user data store is a list of items keyed by FourCC tag. A tag can
//! occur more than once; items of one tag are addressed by a 1-based
//! index. Tags starting with 0xa9 ('©') hold language-tagged text:
//! on the wire those are a list of (size, language, bytes) records
//! inside a single child atom, one text per language.
//!
use std::io;

use crate::atom::{AtomReader, AtomWriter};
use crate::serialize::{FromBytes, ReadBytes, ToBytes, WriteBytes};
use crate::types::{FourCC, MacLanguage};

fn is_text_tag(tag: FourCC) -> bool {
    tag.to_be_bytes()[0] == 0xa9
}

#[derive(Clone, Debug, PartialEq)]
struct Item {
    tag:  FourCC,
    data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
struct TextItem {
    tag:      FourCC,
    language: MacLanguage,
    text:     Vec<u8>,
}

/// Classic user data store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserData {
    items: Vec<Item>,
    texts: Vec<TextItem>,
}

impl UserData {
    pub fn new() -> UserData {
        UserData::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.texts.is_empty()
    }

    /// Append a binary item under `tag`. Returns its 1-based index.
    pub fn add_data(&mut self, tag: FourCC, data: Vec<u8>) -> u32 {
        self.items.push(Item { tag, data });
        self.count(tag)
    }

    /// Get the index'th item of `tag`. Indexes start at 1.
    pub fn get_data(&self, tag: FourCC, index: u32) -> Option<&[u8]> {
        self.items
            .iter()
            .filter(|i| i.tag == tag)
            .nth((index as usize).checked_sub(1)?)
            .map(|i| &i.data[..])
    }

    /// How many items are stored under `tag`.
    pub fn count(&self, tag: FourCC) -> u32 {
        self.items.iter().filter(|i| i.tag == tag).count() as u32
    }

    /// Remove the index'th item of `tag`. Later items shift down.
    pub fn remove_data(&mut self, tag: FourCC, index: u32) -> bool {
        let mut n = 0;
        for (pos, item) in self.items.iter().enumerate() {
            if item.tag == tag {
                n += 1;
                if n == index {
                    self.items.remove(pos);
                    return true;
                }
            }
        }
        false
    }

    /// Set the text for (tag, language). Replaces an existing text
    /// for the same language.
    pub fn add_text(&mut self, tag: FourCC, language: MacLanguage, text: Vec<u8>) {
        if let Some(item) = self
            .texts
            .iter_mut()
            .find(|t| t.tag == tag && t.language == language)
        {
            item.text = text;
            return;
        }
        self.texts.push(TextItem { tag, language, text });
    }

    /// Get the text for (tag, language). If there is no text for that
    /// exact language, the first text of the tag is returned.
    pub fn get_text(&self, tag: FourCC, language: MacLanguage) -> Option<&[u8]> {
        self.texts
            .iter()
            .find(|t| t.tag == tag && t.language == language)
            .or_else(|| self.texts.iter().find(|t| t.tag == tag))
            .map(|t| &t.text[..])
    }

    pub fn remove_text(&mut self, tag: FourCC, language: MacLanguage) -> bool {
        let len = self.texts.len();
        self.texts.retain(|t| !(t.tag == tag && t.language == language));
        self.texts.len() != len
    }

    /// All tags that have at least one text item.
    pub fn text_tags(&self) -> Vec<FourCC> {
        let mut tags = Vec::new();
        for t in &self.texts {
            if !tags.contains(&t.tag) {
                tags.push(t.tag);
            }
        }
        tags
    }

    /// Languages for which `tag` has a text.
    pub fn text_languages(&self, tag: FourCC) -> Vec<MacLanguage> {
        self.texts
            .iter()
            .filter(|t| t.tag == tag)
            .map(|t| t.language)
            .collect()
    }
}

impl FromBytes for UserData {
    // The payload of a `udta` atom: child atoms, optionally followed
    // by a 32 bit zero terminator.
    fn from_bytes<R: ReadBytes>(stream: &mut R) -> io::Result<UserData> {
        let mut udta = UserData::new();
        while stream.left() >= 8 {
            let mut reader = AtomReader::new(stream)?;
            let tag = reader.header.fourcc;
            if tag == FourCC(0) {
                break;
            }
            if is_text_tag(tag) {
                // (size, language, bytes) records.
                while reader.left() >= 4 {
                    let size = u16::from_bytes(&mut reader)? as u64;
                    let language = MacLanguage::from_bytes(&mut reader)?;
                    let size = std::cmp::min(size, reader.left());
                    let text = if size > 0 { reader.read(size)?.to_vec() } else { Vec::new() };
                    udta.texts.push(TextItem { tag, language, text });
                }
            } else {
                let size = reader.left();
                let data = if size > 0 { reader.read(size)?.to_vec() } else { Vec::new() };
                udta.items.push(Item { tag, data });
            }
        }
        Ok(udta)
    }

    fn min_size() -> usize {
        0
    }
}

impl ToBytes for UserData {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        for item in &self.items {
            let mut writer = AtomWriter::new(stream, item.tag)?;
            writer.write(&item.data)?;
            writer.finalize()?;
        }
        for tag in self.text_tags() {
            let mut writer = AtomWriter::new(stream, tag)?;
            for t in self.texts.iter().filter(|t| t.tag == tag) {
                (t.text.len() as u16).to_bytes(&mut writer)?;
                t.language.to_bytes(&mut writer)?;
                writer.write(&t.text)?;
            }
            writer.finalize()?;
        }
        // Classic terminator.
        0u32.to_bytes(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemWriter;

    const CPY: FourCC = FourCC::new(b"\xa9cpy");
    const LOOP: FourCC = FourCC::new(b"LOOP");

    #[test]
    fn data_items_are_indexed() {
        let mut udta = UserData::new();
        assert_eq!(udta.add_data(LOOP, vec![0, 0, 0, 1]), 1);
        assert_eq!(udta.add_data(LOOP, vec![0, 0, 0, 2]), 2);
        assert_eq!(udta.count(LOOP), 2);
        assert_eq!(udta.get_data(LOOP, 1), Some(&[0, 0, 0, 1][..]));
        assert_eq!(udta.get_data(LOOP, 2), Some(&[0, 0, 0, 2][..]));
        assert_eq!(udta.get_data(LOOP, 0), None);
        assert_eq!(udta.get_data(LOOP, 3), None);

        assert!(udta.remove_data(LOOP, 1));
        assert_eq!(udta.count(LOOP), 1);
        assert_eq!(udta.get_data(LOOP, 1), Some(&[0, 0, 0, 2][..]));
        assert!(!udta.remove_data(LOOP, 5));
    }

    #[test]
    fn text_by_language() {
        let eng = MacLanguage::from_iso639("eng").unwrap();
        let fra = MacLanguage::from_iso639("fra").unwrap();
        let mut udta = UserData::new();
        udta.add_text(CPY, eng, b"copyright".to_vec());
        udta.add_text(CPY, fra, b"droits".to_vec());
        assert_eq!(udta.get_text(CPY, eng), Some(&b"copyright"[..]));
        assert_eq!(udta.get_text(CPY, fra), Some(&b"droits"[..]));

        // Replace, not append.
        udta.add_text(CPY, eng, b"(c) 2004".to_vec());
        assert_eq!(udta.text_languages(CPY).len(), 2);
        assert_eq!(udta.get_text(CPY, eng), Some(&b"(c) 2004"[..]));

        // Unknown language falls back to the first text.
        let rus = MacLanguage(32);
        assert_eq!(udta.get_text(CPY, rus), Some(&b"(c) 2004"[..]));
    }

    #[test]
    fn roundtrip() {
        let eng = MacLanguage::from_iso639("eng").unwrap();
        let mut udta = UserData::new();
        udta.add_data(LOOP, vec![0, 0, 0, 1]);
        udta.add_text(CPY, eng, b"mine".to_vec());

        let mut w = MemWriter::new();
        udta.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();
        // Trailing terminator.
        assert_eq!(&buf[buf.len() - 4..], &[0, 0, 0, 0]);

        let udta2 = UserData::from_bytes(&mut &buf[..]).unwrap();
        assert_eq!(udta, udta2);
    }
}
