//! Word count built as a shared library, for `mrworker path/to/libmrapps_wc.so`.

use mrjobs::mr::app::KeyValue;
use mrjobs::mrapps::wc;

#[no_mangle]
pub fn map(name: &str, contents: &str) -> Vec<KeyValue> {
    wc::map(name, contents)
}

#[no_mangle]
pub fn reduce(key: &str, values: &[String]) -> String {
    wc::reduce(key, values)
}
