use serde::Serialize;
use std::fmt;

use crate::storage::{CommitRecord, SectionKey};

/// 行位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

/// 分组；未配置分组字段时只有一个无标题分组
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: Option<String>,
    pub rows: Vec<CommitRecord>,
}

/// 某一时刻的查询结果
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ViewSnapshot {
    sections: Vec<Section>,
}

impl ViewSnapshot {
    /// 初始快照
    pub fn empty(section_key: Option<SectionKey>) -> Self {
        Self::build(Vec::new(), section_key)
    }

    /// `records` 已按排序字段排好；分组按标题升序，组内保持原顺序
    pub fn build(mut records: Vec<CommitRecord>, section_key: Option<SectionKey>) -> Self {
        let key = match section_key {
            Some(key) => key,
            None => {
                return Self {
                    sections: vec![Section {
                        title: None,
                        rows: records,
                    }],
                }
            }
        };

        records.sort_by_cached_key(|record| key.label(record));

        let mut sections: Vec<Section> = Vec::new();
        for record in records {
            let label = key.label(&record);
            match sections.last_mut() {
                Some(section) if section.title.as_deref() == Some(label.as_str()) => {
                    section.rows.push(record)
                }
                _ => sections.push(Section {
                    title: Some(label),
                    rows: vec![record],
                }),
            }
        }

        Self { sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn row(&self, path: IndexPath) -> Option<&CommitRecord> {
        self.sections.get(path.section)?.rows.get(path.row)
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按显示顺序遍历所有行
    pub fn rows(&self) -> impl Iterator<Item = (IndexPath, &CommitRecord)> {
        self.sections.iter().enumerate().flat_map(|(section, s)| {
            s.rows
                .iter()
                .enumerate()
                .map(move |(row, record)| (IndexPath::new(section, row), record))
        })
    }

    pub fn position_of(&self, sha: &str) -> Option<IndexPath> {
        self.rows()
            .find(|(_, record)| record.sha() == sha)
            .map(|(path, _)| path)
    }
}
