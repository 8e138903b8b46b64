//! Node id lists stored under one index key.
//!
//! Wire format: a sequence of sections, one per document in ascending
//! document id order:
//!
//! ```text
//! varint doc_id | varint count | count x varint gid delta
//! ```
//!
//! Gids inside a section are sorted and delta encoded. Duplicates are kept.

use crate::dom::{DocumentId, NodeId};
use crate::error::{Result, XmldexError};
use crate::util::varint::{decode_u64, put_delta_u64s, take_delta_u64s, encode_u64};

/// The gids of one document under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPostings {
    pub doc_id: DocumentId,
    pub gids: Vec<u64>,
}

/// All node ids stored under one key, grouped by document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Postings {
    sections: Vec<DocPostings>,
}

impl Postings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of node ids.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.gids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocPostings> {
        self.sections.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sections
            .iter()
            .flat_map(|s| s.gids.iter().map(move |&gid| NodeId::new(s.doc_id, gid)))
    }

    fn section_mut(&mut self, doc_id: DocumentId) -> &mut DocPostings {
        let index = match self.sections.binary_search_by_key(&doc_id, |s| s.doc_id) {
            Ok(index) => index,
            Err(index) => {
                self.sections.insert(
                    index,
                    DocPostings {
                        doc_id,
                        gids: Vec::new(),
                    },
                );
                index
            }
        };
        &mut self.sections[index]
    }

    /// Add `gids` to the section of `doc_id`.
    pub fn append(&mut self, doc_id: DocumentId, gids: &[u64]) {
        if gids.is_empty() {
            return;
        }
        let section = self.section_mut(doc_id);
        section.gids.extend_from_slice(gids);
        section.gids.sort_unstable();
    }

    /// Remove every occurrence of `gids` from the section of `doc_id`.
    /// Returns how many node ids were removed.
    pub fn remove_nodes(&mut self, doc_id: DocumentId, gids: &[u64]) -> usize {
        let Ok(index) = self.sections.binary_search_by_key(&doc_id, |s| s.doc_id) else {
            return 0;
        };
        let section = &mut self.sections[index];
        let before = section.gids.len();
        section.gids.retain(|gid| !gids.contains(gid));
        let removed = before - section.gids.len();
        if section.gids.is_empty() {
            self.sections.remove(index);
        }
        removed
    }

    /// Remove the whole section of `doc_id`. Returns how many node ids were removed.
    pub fn remove_document(&mut self, doc_id: DocumentId) -> usize {
        match self.sections.binary_search_by_key(&doc_id, |s| s.doc_id) {
            Ok(index) => self.sections.remove(index).gids.len(),
            Err(_) => 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * 2 + self.sections.len() * 2);
        for section in &self.sections {
            out.extend_from_slice(&encode_u64(section.doc_id as u64));
            put_delta_u64s(&mut out, &section.gids);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut sections: Vec<DocPostings> = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let (doc_id, used) = decode_u64(&bytes[offset..])?;
            offset += used;
            let doc_id = DocumentId::try_from(doc_id)
                .map_err(|_| XmldexError::index(format!("document id {doc_id} out of range")))?;
            if sections.last().is_some_and(|last| last.doc_id >= doc_id) {
                return Err(XmldexError::index(format!(
                    "postings sections out of order at document {doc_id}"
                )));
            }

            let (gids, used) = take_delta_u64s(&bytes[offset..])?;
            offset += used;
            if gids.is_empty() {
                return Err(XmldexError::index(format!(
                    "empty postings section for document {doc_id}"
                )));
            }
            sections.push(DocPostings { doc_id, gids });
        }

        Ok(Postings { sections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_groups_by_document() {
        let mut postings = Postings::new();
        postings.append(5, &[9, 3]);
        postings.append(2, &[7]);
        postings.append(5, &[3]);

        let nodes: Vec<NodeId> = postings.iter().collect();
        assert_eq!(
            nodes,
            vec![
                NodeId::new(2, 7),
                NodeId::new(5, 3),
                NodeId::new(5, 3),
                NodeId::new(5, 9)
            ]
        );
        assert_eq!(postings.len(), 4);
        assert_eq!(Postings::decode(&postings.encode()).unwrap(), postings);
    }

    #[test]
    fn test_remove_nodes_and_documents() {
        let mut postings = Postings::new();
        postings.append(1, &[4, 4, 6]);
        postings.append(2, &[1]);

        assert_eq!(postings.remove_nodes(1, &[4]), 2);
        assert_eq!(postings.remove_nodes(3, &[1]), 0);
        assert_eq!(postings.remove_document(2), 1);
        assert_eq!(postings.iter().collect::<Vec<_>>(), vec![NodeId::new(1, 6)]);

        assert_eq!(postings.remove_nodes(1, &[6]), 1);
        assert!(postings.is_empty());
        assert!(postings.encode().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Postings::decode(&[0x80]).is_err());
        // doc 1, count 0
        assert!(Postings::decode(&[0x01, 0x00]).is_err());
        // doc 2 then doc 1
        assert!(Postings::decode(&[0x02, 0x01, 0x01, 0x01, 0x01, 0x01]).is_err());
    }
}
