//! クラス番号 → 表示ラベルの対応表
//!
//! CSV形式（ヘッダー行 + `class_index,display_label,description,group`）を読み込みます。

use csv::{ReaderBuilder, Trim};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{ClassifierError, Result};
use crate::types::LabelMappingEntry;

/// 読み込み済みのラベル表（読み取り専用）
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    entries: HashMap<usize, LabelMappingEntry>,
}

impl LabelTable {
    /// CSVを解析してラベル表を作成
    ///
    /// 先頭行はヘッダーとして読み飛ばします。
    /// クラス番号が読めない行は警告を出して除外し、欠けている文字列列は空文字にします。
    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut entries = HashMap::new();
        let mut failed_records = 0usize;
        let mut last_error = None;

        for (line, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!("[label_table] {}: 行{}を解析できません: {}", source_name, line + 2, e);
                    failed_records += 1;
                    last_error = Some(e);
                    continue;
                }
            };

            // 空行
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }

            let class_index = match record.get(0).and_then(|v| v.parse::<usize>().ok()) {
                Some(index) => index,
                None => {
                    warn!(
                        "[label_table] {}: 行{}のクラス番号が不正です: {:?}",
                        source_name,
                        line + 2,
                        record.get(0)
                    );
                    continue;
                }
            };

            let field = |i: usize| record.get(i).unwrap_or_default().to_string();
            let entry = LabelMappingEntry {
                class_index,
                display_label: field(1),
                description: field(2),
                group: field(3),
            };

            if entries.contains_key(&class_index) {
                warn!(
                    "[label_table] {}: クラス番号 {} が重複しています（最初の行を使用）",
                    source_name, class_index
                );
                continue;
            }
            entries.insert(class_index, entry);
        }

        if entries.is_empty() {
            if let Some(e) = last_error {
                return Err(ClassifierError::load(
                    source_name,
                    format!("no row could be parsed ({} failed): {}", failed_records, e),
                ));
            }
        }

        Ok(Self { entries })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| ClassifierError::load(&name, e))?;
        Self::from_reader(file, &name)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = LabelMappingEntry>) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            map.entry(entry.class_index).or_insert(entry);
        }
        Self { entries: map }
    }

    pub fn lookup(&self, class_index: usize) -> Option<&LabelMappingEntry> {
        self.entries.get(&class_index)
    }

    /// 未登録のクラスは `"Class {index}"` の代替エントリを返す
    pub fn entry_or_fallback(&self, class_index: usize) -> LabelMappingEntry {
        self.lookup(class_index)
            .cloned()
            .unwrap_or_else(|| LabelMappingEntry::fallback(class_index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// プロセス全体で共有するラベル表
///
/// 最初の `load` でファイルを読み込み、以降は同じ表を返します。
/// 読み込みに失敗した場合はキャッシュされないため、再試行できます。
#[derive(Debug)]
pub struct LabelStore {
    path: PathBuf,
    table: OnceCell<Arc<LabelTable>>,
}

impl LabelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: OnceCell::new(),
        }
    }

    /// 読み込み済みの表で初期化（テストや埋め込み用）
    pub fn preloaded(table: LabelTable) -> Self {
        Self {
            path: PathBuf::new(),
            table: OnceCell::new_with(Some(Arc::new(table))),
        }
    }

    pub async fn load(&self) -> Result<Arc<LabelTable>> {
        let table = self
            .table
            .get_or_try_init(|| async {
                let name = self.path.display().to_string();
                let bytes = tokio::fs::read(&self.path)
                    .await
                    .map_err(|e| ClassifierError::load(&name, e))?;
                let table = LabelTable::from_reader(bytes.as_slice(), &name)?;
                info!("[label_table] {} 件のラベルを読み込みました: {}", table.len(), name);
                Ok::<_, ClassifierError>(Arc::new(table))
            })
            .await?;
        Ok(Arc::clone(table))
    }

    pub fn get(&self) -> Option<Arc<LabelTable>> {
        self.table.get().cloned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
