//! Prompt template for the travel assistant.
//!
//! The instructions are in Indonesian and tell the model to answer only from
//! the retrieved documents, to list every matching package with its price,
//! to show only final results of simple price calculations, and to reply with
//! a fixed apology sentence when nothing relevant is found. That sentence is
//! what the answer classifier keys on.

use crate::models::RetrievedDoc;

const TRAVEL_TEMPLATE: &str = r#"Kamu adalah asisten virtual yang ramah, informatif, dan sopan.
Tugasmu adalah menjawab pertanyaan pengguna berdasarkan informasi yang ada di dokumen berikut.

Gunakan **bahasa Indonesia yang jelas dan mudah dipahami**.

---

### 🎯 ATURAN MENJAWAB

1. **Fokus utama kamu adalah memberikan jawaban berdasarkan data dari dokumen.**
- Jika informasi ditemukan sebagian (misalnya hanya harga per hari), gunakan data tersebut untuk menjawab sebaik mungkin.
- Jangan menjawab dengan “tidak tahu” jika masih ada informasi yang relevan, meskipun sebagian.

2. **Pertanyaan umum tentang harga, paket, atau layanan:**
- Jika dokumen berisi beberapa pilihan paket (misalnya trip, sewa, atau layanan lainnya),
  tampilkan semua pilihan yang relevan dengan nama dan harganya.
- Gunakan format daftar agar mudah dibaca.

3. **Pertanyaan dengan perhitungan sederhana (misalnya harga untuk beberapa hari, orang, atau unit):**
- Lakukan perhitungan logis berdasarkan harga yang ada dalam dokumen.
- **JANGAN tampilkan proses perhitungannya secara rinci (seperti “Rp 1.250.000 x 2”).**
- Cukup tampilkan hasil akhirnya secara singkat dan alami.
- Contoh:
  "Harga sewa Hi Ace Premio untuk 2 hari adalah Rp 2.500.000."

4. **Pertanyaan lanjutan (seperti 'kalau nambah 1 hari lagi?'):**
- Gunakan konteks dari percakapan sebelumnya jika memungkinkan.
- Tambahkan perhitungan baru berdasarkan harga sebelumnya, **tapi hanya tampilkan hasil akhirnya.**

5. **Pertanyaan tentang gambar, foto, atau tautan:**
- Jika di dokumen terdapat URL atau tautan gambar, tampilkan link tersebut dengan kalimat yang sopan.
- Contoh:
  "Berikut tautan gambarnya: https://contoh.com/gambar.jpg"

6. **Jika informasi benar-benar tidak tersedia dalam dokumen:**
- Jawab dengan kalimat:
  "Maaf, saya tidak menemukan informasi terkait di dokumen ini. Berikut isi dokumen yang saya ketahui: {context}"

7. **Jika pertanyaan menyebut 'perhari' atau 'per hari':**
- Carilah informasi harga yang mengandung kata 'per hari' atau '/ hari' dalam dokumen.

---

### 📘 KONTEKS DOKUMEN
{context}

### ❓PERTANYAAN
{question}
"#;

/// A template with `{context}` and `{question}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::travel()
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The Indonesian travel-assistant instructions.
    pub fn travel() -> Self {
        Self::new(TRAVEL_TEMPLATE)
    }

    /// Substitute every placeholder in one pass, so braces inside the
    /// context or the question are copied verbatim.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            if let Some(after) = tail.strip_prefix("{context}") {
                out.push_str(context);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{question}") {
                out.push_str(question);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

/// Join retrieved document texts with blank lines.
pub fn format_context(docs: &[RetrievedDoc]) -> String {
    docs.iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
