//! Schema-aware record codec: field order follows the table's declared
//! column list and field names are never written, which keeps the encoding
//! compact and canonical — two records with the same logical values always
//! produce identical bytes, since both the column order and the per-value
//! tag layout are fixed.
//!
//! Every value still carries a one-byte type tag even though the column's
//! declared kind is already known from metadata: it is what lets `Null`
//! round-trip through a nullable column of any scalar kind without having to
//! thread the column's `ScalarKind` back into the decoder.

use catalog::TableMeta;
use common::{DbError, DbResult, Record};
use types::{RefValue, Value};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_REF_ID: u8 = 6;
const TAG_REF_IDS: u8 = 7;

pub fn encode_record(meta: &TableMeta, record: &Record) -> Vec<u8> {
    let mut buf = Vec::new();
    for name in meta.column_names() {
        let value = record.get(name).cloned().unwrap_or(Value::Null);
        encode_value(&value, &mut buf);
    }
    buf
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(*b as u8);
        }
        Value::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(TAG_STRING);
            encode_str(s, buf);
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(item, buf);
            }
        }
        Value::Ref(RefValue::Id(id)) => {
            buf.push(TAG_REF_ID);
            encode_str(id, buf);
        }
        Value::Ref(RefValue::Ids(ids)) => {
            buf.push(TAG_REF_IDS);
            buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
            for id in ids {
                encode_str(id, buf);
            }
        }
    }
}

fn encode_str(s: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub fn decode_record(meta: &TableMeta, bytes: &[u8]) -> DbResult<Record> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let mut record = Record::new();
    for name in meta.column_names() {
        // A column appended to the schema after this record was encoded has
        // no bytes on disk for it; such trailing columns read as null rather
        // than a corrupt-page error.
        if cursor.pos == cursor.bytes.len() {
            break;
        }
        let value = decode_value(&mut cursor)?;
        if !value.is_null() {
            record.set(name, value);
        }
    }
    Ok(record)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> DbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| DbError::CorruptPage("record codec ran past end of buffer".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> DbResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> DbResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_string(&mut self) -> DbResult<String> {
        let len = self.take_u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec())
            .map_err(|e| DbError::CorruptPage(format!("invalid utf8 in record: {e}")))
    }
}

fn decode_value(cursor: &mut Cursor) -> DbResult<Value> {
    match cursor.take_u8()? {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(cursor.take_u8()? != 0)),
        TAG_INT => Ok(Value::Int(i64::from_le_bytes(
            cursor.take(8)?.try_into().unwrap(),
        ))),
        TAG_FLOAT => Ok(Value::Float(f64::from_le_bytes(
            cursor.take(8)?.try_into().unwrap(),
        ))),
        TAG_STRING => Ok(Value::String(cursor.take_string()?)),
        TAG_LIST => {
            let len = cursor.take_u32()? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(cursor)?);
            }
            Ok(Value::List(items))
        }
        TAG_REF_ID => Ok(Value::Ref(RefValue::Id(cursor.take_string()?))),
        TAG_REF_IDS => {
            let len = cursor.take_u32()? as usize;
            let mut ids = Vec::with_capacity(len);
            for _ in 0..len {
                ids.push(cursor.take_string()?);
            }
            Ok(Value::Ref(RefValue::Ids(ids)))
        }
        other => Err(DbError::CorruptPage(format!(
            "unknown record value tag {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::Column;
    use types::ScalarKind;

    fn sample_meta() -> TableMeta {
        TableMeta::try_new(
            "users",
            vec![
                Column::scalar("id", ScalarKind::Id, false),
                Column::scalar("name", ScalarKind::String, false),
                Column::scalar("age", ScalarKind::Int, true),
            ],
            "id",
        )
        .unwrap()
    }

    #[test]
    fn round_trips_every_scalar_kind() {
        let meta = sample_meta();
        let record: Record = [
            ("id", Value::String("u1".into())),
            ("name", Value::String("Ada".into())),
            ("age", Value::Int(36)),
        ]
        .into_iter()
        .collect();

        let bytes = encode_record(&meta, &record);
        let decoded = decode_record(&meta, &bytes).unwrap();
        assert_eq!(decoded.get("id"), Some(&Value::String("u1".into())));
        assert_eq!(decoded.get("name"), Some(&Value::String("Ada".into())));
        assert_eq!(decoded.get("age"), Some(&Value::Int(36)));
    }

    #[test]
    fn null_column_is_omitted_from_decoded_record() {
        let meta = sample_meta();
        let record: Record = [
            ("id", Value::String("u2".into())),
            ("name", Value::String("Grace".into())),
        ]
        .into_iter()
        .collect();

        let bytes = encode_record(&meta, &record);
        let decoded = decode_record(&meta, &bytes).unwrap();
        assert_eq!(decoded.get("age"), None);
    }

    #[test]
    fn equal_records_encode_identically() {
        let meta = sample_meta();
        let a: Record = [
            ("id", Value::String("u1".into())),
            ("name", Value::String("Ada".into())),
            ("age", Value::Int(36)),
        ]
        .into_iter()
        .collect();
        let b = a.clone();
        assert_eq!(encode_record(&meta, &a), encode_record(&meta, &b));
    }

    #[test]
    fn list_values_round_trip() {
        let meta = TableMeta::try_new(
            "tags",
            vec![
                Column::scalar("id", ScalarKind::Id, false),
                Column {
                    name: "labels".into(),
                    kind: ScalarKind::String,
                    nullable: true,
                    is_list: true,
                    enum_name: None,
                },
            ],
            "id",
        )
        .unwrap();

        let record: Record = [
            ("id", Value::String("t1".into())),
            (
                "labels",
                Value::List(vec![Value::String("a".into()), Value::String("b".into())]),
            ),
        ]
        .into_iter()
        .collect();

        let bytes = encode_record(&meta, &record);
        let decoded = decode_record(&meta, &bytes).unwrap();
        assert_eq!(
            decoded.get("labels"),
            Some(&Value::List(vec![
                Value::String("a".into()),
                Value::String("b".into())
            ]))
        );
    }

    #[test]
    fn column_appended_after_encoding_reads_as_null() {
        let narrow = TableMeta::try_new(
            "users",
            vec![
                Column::scalar("id", ScalarKind::Id, false),
                Column::scalar("name", ScalarKind::String, false),
            ],
            "id",
        )
        .unwrap();
        let record: Record = [
            ("id", Value::String("u1".into())),
            ("name", Value::String("Ada".into())),
        ]
        .into_iter()
        .collect();
        let bytes = encode_record(&narrow, &record);

        let widened = sample_meta();
        let decoded = decode_record(&widened, &bytes).unwrap();
        assert_eq!(decoded.get("name"), Some(&Value::String("Ada".into())));
        assert_eq!(decoded.get("age"), None);
    }

    #[test]
    fn truncated_bytes_report_corrupt_page() {
        let meta = sample_meta();
        let record: Record = [
            ("id", Value::String("u1".into())),
            ("name", Value::String("Ada".into())),
            ("age", Value::Int(36)),
        ]
        .into_iter()
        .collect();
        let mut bytes = encode_record(&meta, &record);
        bytes.truncate(3);
        assert!(decode_record(&meta, &bytes).is_err());
    }
}
