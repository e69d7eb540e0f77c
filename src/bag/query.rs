// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Query path: message handles and the time-ordered multi-topic merge.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::bag::Bag;
use crate::core::{BagTime, IndexEntry, Result, TopicInfo};

/// A cheap reference to one indexed message.
///
/// Carries the topic schema and the index entry; the payload bytes are
/// materialized lazily by [`MessageHandle::instantiate`], which reads and
/// decompresses the owning chunk on demand.
#[derive(Clone, Copy)]
pub struct MessageHandle<'a> {
    topic_info: &'a TopicInfo,
    entry: IndexEntry,
    bag: &'a Bag,
}

impl<'a> MessageHandle<'a> {
    /// Topic the message was published on.
    pub fn topic(&self) -> &'a str {
        &self.topic_info.topic
    }

    /// Message timestamp.
    pub fn time(&self) -> BagTime {
        self.entry.time
    }

    /// Message datatype.
    pub fn datatype(&self) -> &'a str {
        &self.topic_info.datatype
    }

    /// Hash of the message definition.
    pub fn md5sum(&self) -> &'a str {
        &self.topic_info.md5sum
    }

    /// Message definition text.
    pub fn message_definition(&self) -> &'a str {
        &self.topic_info.msg_def
    }

    /// Full schema of the topic.
    pub fn topic_info(&self) -> &'a TopicInfo {
        self.topic_info
    }

    /// Index entry locating the message.
    pub fn index_entry(&self) -> IndexEntry {
        self.entry
    }

    /// Materialize the payload bytes.
    ///
    /// A failure here leaves the bag and any other handles usable.
    pub fn instantiate(&self) -> Result<Vec<u8>> {
        self.bag.read_message_data(&self.entry, &self.topic_info.topic)
    }
}

/// Per-topic cursor over a time-bounded slice of the index.
struct MergeCursor<'a> {
    entries: &'a [IndexEntry],
    pos: usize,
    info: &'a TopicInfo,
}

impl Bag {
    /// Messages on the given topics between `start` and `end` inclusive,
    /// merged into non-decreasing time order.
    ///
    /// Ties are broken by the order the topics were requested in, so the
    /// output is stable and each message is produced exactly once. Topics
    /// without an index are skipped. Per-topic order is write order; the
    /// global ordering guarantee assumes callers wrote each topic with
    /// non-decreasing timestamps.
    pub fn get_messages_by_topic(
        &self,
        topics: &[&str],
        start: BagTime,
        end: BagTime,
    ) -> Vec<MessageHandle<'_>> {
        let mut cursors: Vec<MergeCursor<'_>> = Vec::new();
        for topic in topics {
            let (Some(entries), Some(info)) =
                (self.topic_indexes.get(*topic), self.topic_infos.get(*topic))
            else {
                continue;
            };

            let lo = entries.partition_point(|e| e.time < start);
            let hi = entries.partition_point(|e| e.time <= end);
            if lo < hi {
                cursors.push(MergeCursor {
                    entries: &entries[lo..hi],
                    pos: 0,
                    info,
                });
            }
        }

        let mut heap: BinaryHeap<Reverse<(BagTime, usize)>> = cursors
            .iter()
            .enumerate()
            .map(|(order, cursor)| Reverse((cursor.entries[0].time, order)))
            .collect();

        let mut messages = Vec::new();
        while let Some(Reverse((_, order))) = heap.pop() {
            let cursor = &mut cursors[order];
            let entry = cursor.entries[cursor.pos];
            messages.push(MessageHandle {
                topic_info: cursor.info,
                entry,
                bag: self,
            });

            cursor.pos += 1;
            if cursor.pos < cursor.entries.len() {
                heap.push(Reverse((cursor.entries[cursor.pos].time, order)));
            }
        }
        messages
    }

    /// All messages between `start` and `end` inclusive, in unspecified
    /// order. This is the cheap scan; it does not merge by time.
    pub fn get_messages(&self, start: BagTime, end: BagTime) -> Vec<MessageHandle<'_>> {
        let mut messages = Vec::new();
        for (topic, info) in &self.topic_infos {
            let Some(entries) = self.topic_indexes.get(topic) else {
                continue;
            };
            for entry in entries {
                if entry.time >= start && entry.time <= end {
                    messages.push(MessageHandle {
                        topic_info: info,
                        entry: *entry,
                        bag: self,
                    });
                }
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BagMode;
    use crate::MessageSchema;
    use tempfile::TempDir;

    fn schema() -> MessageSchema<'static> {
        MessageSchema {
            datatype: "test_msgs/Raw",
            md5sum: "0123456789abcdef0123456789abcdef",
            definition: "uint8[] data",
        }
    }

    fn build_bag(dir: &TempDir, writes: &[(&str, BagTime)]) -> Bag {
        let path = dir.path().join("merge.bag");
        let mut bag = Bag::open(&path, BagMode::Write).unwrap();
        for (i, (topic, time)) in writes.iter().enumerate() {
            bag.write(topic, *time, &[i as u8], schema()).unwrap();
        }
        bag.close().unwrap();
        Bag::open(&path, BagMode::Read).unwrap()
    }

    #[test]
    fn test_merge_interleaves_topics_by_time() {
        let dir = TempDir::new().unwrap();
        let bag = build_bag(
            &dir,
            &[
                ("/a", BagTime::new(1, 0)),
                ("/b", BagTime::new(2, 0)),
                ("/a", BagTime::new(3, 0)),
                ("/b", BagTime::new(4, 0)),
            ],
        );

        let times: Vec<BagTime> = bag
            .get_messages_by_topic(&["/a", "/b"], BagTime::ZERO, BagTime::MAX)
            .iter()
            .map(|h| h.time())
            .collect();
        assert_eq!(
            times,
            vec![
                BagTime::new(1, 0),
                BagTime::new(2, 0),
                BagTime::new(3, 0),
                BagTime::new(4, 0)
            ]
        );
    }

    #[test]
    fn test_merge_tie_break_is_stable() {
        let dir = TempDir::new().unwrap();
        let t = BagTime::new(5, 0);
        let bag = build_bag(&dir, &[("/a", t), ("/b", t), ("/c", t)]);

        let handles = bag.get_messages_by_topic(&["/c", "/a", "/b"], BagTime::ZERO, BagTime::MAX);
        let topics: Vec<&str> = handles.iter().map(|h| h.topic()).collect();
        // Equal timestamps come out in requested-topic order
        assert_eq!(topics, vec!["/c", "/a", "/b"]);
        assert_eq!(handles.len(), 3);
    }

    #[test]
    fn test_merge_respects_time_bounds() {
        let dir = TempDir::new().unwrap();
        let bag = build_bag(
            &dir,
            &[
                ("/a", BagTime::new(1, 0)),
                ("/a", BagTime::new(2, 0)),
                ("/a", BagTime::new(3, 0)),
                ("/a", BagTime::new(4, 0)),
            ],
        );

        let times: Vec<BagTime> = bag
            .get_messages_by_topic(&["/a"], BagTime::new(2, 0), BagTime::new(3, 0))
            .iter()
            .map(|h| h.time())
            .collect();
        // Bounds are inclusive at both ends
        assert_eq!(times, vec![BagTime::new(2, 0), BagTime::new(3, 0)]);
    }

    #[test]
    fn test_merge_skips_unknown_topics() {
        let dir = TempDir::new().unwrap();
        let bag = build_bag(&dir, &[("/a", BagTime::new(1, 0))]);
        let handles = bag.get_messages_by_topic(&["/missing", "/a"], BagTime::ZERO, BagTime::MAX);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].topic(), "/a");
    }

    #[test]
    fn test_unordered_scan_filters_inclusively() {
        let dir = TempDir::new().unwrap();
        let bag = build_bag(
            &dir,
            &[
                ("/a", BagTime::new(1, 0)),
                ("/b", BagTime::new(2, 0)),
                ("/a", BagTime::new(3, 0)),
            ],
        );

        let handles = bag.get_messages(BagTime::new(1, 0), BagTime::new(2, 0));
        assert_eq!(handles.len(), 2);
        for handle in &handles {
            assert!(handle.time() >= BagTime::new(1, 0));
            assert!(handle.time() <= BagTime::new(2, 0));
        }
    }
}
